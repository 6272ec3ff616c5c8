//! Stability pool events.
//!
//! Every mutating ledger operation records what it changed: deposit values,
//! payouts, front-end stakes and the global accumulators (`P`, `S`, `G`,
//! epoch, scale). Events are stamped with a sequence number and a wall-clock
//! timestamp, buffered in a bounded `EventLog`, and drained by the service
//! layer which forwards them to `tracing`.

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::utils::crypto::{AccountId, Hash};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All stability pool event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolEvent {
    // Depositor Events
    /// A depositor's initial deposit was rewritten after settlement
    DepositUpdated {
        /// Depositor
        depositor: AccountId,
        /// New initial deposit (zero when the record was removed)
        new_deposit: TokenAmount,
    },
    /// A depositor's snapshot was refreshed
    DepositSnapshotUpdated {
        /// Depositor
        depositor: AccountId,
        /// Snapshot of `P`
        p: FixedPoint,
        /// Snapshot of `S`
        s: U256,
        /// Snapshot of `G`
        g: U256,
    },
    /// Accrued collateral gain was paid out
    CollateralGainWithdrawn {
        /// Depositor
        depositor: AccountId,
        /// Gain paid
        gain: CollateralAmount,
        /// Stake lost to offsets since the previous settlement
        stake_loss: TokenAmount,
    },
    /// Collateral gain was moved into the depositor's line of credit
    CollateralGainToLineOfCredit {
        /// Depositor and line owner
        depositor: AccountId,
        /// Collateral moved
        gain: CollateralAmount,
    },
    /// ZERO rewards paid to a depositor
    ZeroPaidToDepositor {
        /// Depositor
        depositor: AccountId,
        /// Amount paid
        amount: ZeroTokenAmount,
    },

    // Front End Events
    /// A front end registered with a kickback rate
    FrontEndRegistered {
        /// Front end
        front_end: AccountId,
        /// Share of ZERO rewards passed to its depositors
        kickback_rate: FixedPoint,
    },
    /// A depositor's front-end tag was set or cleared
    FrontEndTagSet {
        /// Depositor
        depositor: AccountId,
        /// Tag (None clears it)
        front_end: Option<AccountId>,
    },
    /// A front end's aggregated stake changed
    FrontEndStakeChanged {
        /// Front end
        front_end: AccountId,
        /// New compounded stake
        new_stake: TokenAmount,
        /// Depositor whose operation caused the change
        depositor: AccountId,
    },
    /// ZERO rewards paid to a front end
    ZeroPaidToFrontEnd {
        /// Front end
        front_end: AccountId,
        /// Amount paid
        amount: ZeroTokenAmount,
    },

    // Accumulator Events
    /// Running product changed
    ProductUpdated {
        /// New `P`
        p: FixedPoint,
    },
    /// Collateral gain sum of a bucket changed
    SumUpdated {
        /// Epoch of the bucket
        epoch: u64,
        /// Scale of the bucket
        scale: u64,
        /// New sum
        sum: U256,
    },
    /// ZERO reward sum of a bucket changed
    ZeroSumUpdated {
        /// Epoch of the bucket
        epoch: u64,
        /// Scale of the bucket
        scale: u64,
        /// New sum
        sum: U256,
    },
    /// Epoch advanced (pool emptied)
    EpochUpdated {
        /// New epoch
        epoch: u64,
    },
    /// Scale advanced
    ScaleUpdated {
        /// New scale
        scale: u64,
    },

    // Pool Events
    /// Liquidated debt was offset against the pool
    Offset {
        /// Debt cancelled
        debt: TokenAmount,
        /// Collateral received
        collateral: CollateralAmount,
    },
    /// Pooled ZUSD total changed
    PoolBalanceUpdated {
        /// New total
        total: TokenAmount,
    },
    /// Collateral held by the pool changed
    PoolCollateralUpdated {
        /// New total
        total: CollateralAmount,
    },
}

impl PoolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DepositUpdated { .. } => "DepositUpdated",
            Self::DepositSnapshotUpdated { .. } => "DepositSnapshotUpdated",
            Self::CollateralGainWithdrawn { .. } => "CollateralGainWithdrawn",
            Self::CollateralGainToLineOfCredit { .. } => "CollateralGainToLineOfCredit",
            Self::ZeroPaidToDepositor { .. } => "ZeroPaidToDepositor",
            Self::FrontEndRegistered { .. } => "FrontEndRegistered",
            Self::FrontEndTagSet { .. } => "FrontEndTagSet",
            Self::FrontEndStakeChanged { .. } => "FrontEndStakeChanged",
            Self::ZeroPaidToFrontEnd { .. } => "ZeroPaidToFrontEnd",
            Self::ProductUpdated { .. } => "ProductUpdated",
            Self::SumUpdated { .. } => "SumUpdated",
            Self::ZeroSumUpdated { .. } => "ZeroSumUpdated",
            Self::EpochUpdated { .. } => "EpochUpdated",
            Self::ScaleUpdated { .. } => "ScaleUpdated",
            Self::Offset { .. } => "Offset",
            Self::PoolBalanceUpdated { .. } => "PoolBalanceUpdated",
            Self::PoolCollateralUpdated { .. } => "PoolCollateralUpdated",
        }
    }

    /// Account the event is about, if any
    pub fn account(&self) -> Option<&AccountId> {
        match self {
            Self::DepositUpdated { depositor, .. }
            | Self::DepositSnapshotUpdated { depositor, .. }
            | Self::CollateralGainWithdrawn { depositor, .. }
            | Self::CollateralGainToLineOfCredit { depositor, .. }
            | Self::ZeroPaidToDepositor { depositor, .. }
            | Self::FrontEndTagSet { depositor, .. } => Some(depositor),
            Self::FrontEndRegistered { front_end, .. }
            | Self::FrontEndStakeChanged { front_end, .. }
            | Self::ZeroPaidToFrontEnd { front_end, .. } => Some(front_end),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT RECORD
// ═══════════════════════════════════════════════════════════════════════════════

/// An event with its position in the pool's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number (never reused, survives draining)
    pub sequence: u64,
    /// Wall-clock time the event was recorded
    pub timestamp: DateTime<Utc>,
    /// The event itself
    pub event: PoolEvent,
}

impl EventRecord {
    /// Compute event hash
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).unwrap_or_default();
        Hash::sha256(&data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded buffer of recorded events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    events: VecDeque<EventRecord>,
    next_sequence: u64,
    retention: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(crate::utils::constants::DEFAULT_EVENT_RETENTION)
    }
}

impl EventLog {
    /// Create an empty log keeping at most `retention` events
    pub fn new(retention: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_sequence: 0,
            retention: retention.max(1),
        }
    }

    /// Record an event, dropping the oldest one when full
    pub fn push(&mut self, event: PoolEvent) {
        if self.events.len() == self.retention {
            self.events.pop_front();
        }
        self.events.push_back(EventRecord {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            event,
        });
        self.next_sequence += 1;
    }

    /// Keep a record produced by another log, preserving its sequence number
    pub fn append(&mut self, record: EventRecord) {
        if self.events.len() == self.retention {
            self.events.pop_front();
        }
        self.next_sequence = self.next_sequence.max(record.sequence + 1);
        self.events.push_back(record);
    }

    /// Iterate over buffered events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    /// Remove and return all buffered events
    pub fn drain(&mut self) -> Vec<EventRecord> {
        self.events.drain(..).collect()
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&EventRecord> {
        self.events
            .iter()
            .filter(|r| r.event.event_type() == event_type)
            .collect()
    }

    /// Sequence number the next event will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Get the number of buffered events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
