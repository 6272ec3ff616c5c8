//! The stability pool ledger.
//!
//! Holds every depositor record, the registered front ends and the global
//! accumulators. Each mutating operation settles the records it touches
//! against the accumulators first, computes all new values, and only then
//! commits. The ledger moves no tokens itself: every outcome lists the
//! payouts the caller must make.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::core::config::{PoolConfig, PoolParams, WithdrawalPolicy};
use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::{Error, Result};
use crate::events::{EventLog, EventRecord, PoolEvent};
use crate::pool::accounting::{GlobalState, IssuancePlan, SumView};
use crate::pool::deposit::DepositRecord;
use crate::pool::front_end::FrontEnd;
use crate::pool::snapshot::{FrontEndSnapshot, Snapshot};
use crate::utils::constants::{DECIMAL_PRECISION, DUST_DIVISOR};
use crate::utils::crypto::{AccountId, Hash};
use crate::utils::math::{abs_diff, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a depositor's collateral gain goes when withdrawn on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GainDestination {
    /// Paid to the depositor's account
    Depositor,
    /// Added as collateral to the depositor's line of credit
    LineOfCredit,
}

/// A depositor's position valued against the current accumulators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Depositor
    pub depositor: AccountId,
    /// Deposit value at the last snapshot
    pub initial: TokenAmount,
    /// Deposit value now
    pub compounded: TokenAmount,
    /// Collateral earned since the snapshot
    pub collateral_gain: CollateralAmount,
    /// ZERO earned since the snapshot, after the front end's cut
    pub zero_gain: ZeroTokenAmount,
    /// Front end the deposit is tagged with
    pub front_end: Option<AccountId>,
}

impl Settlement {
    fn empty(depositor: AccountId) -> Self {
        Self {
            depositor,
            initial: TokenAmount::ZERO,
            compounded: TokenAmount::ZERO,
            collateral_gain: CollateralAmount::ZERO,
            zero_gain: ZeroTokenAmount::ZERO,
            front_end: None,
        }
    }

    /// Deposit cancelled by offsets since the snapshot
    pub fn stake_loss(&self) -> TokenAmount {
        self.initial.saturating_sub(self.compounded)
    }
}

/// A front end's stake valued against the current accumulators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEndSettlement {
    /// Front end
    pub front_end: AccountId,
    /// Stake value now
    pub compounded_stake: TokenAmount,
    /// The front end's own ZERO earnings
    pub zero_gain: ZeroTokenAmount,
}

/// Result of a depositor operation: what moved and what must be paid out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositorOutcome {
    /// Depositor
    pub depositor: AccountId,
    /// ZUSD added to the pool
    pub deposited: TokenAmount,
    /// ZUSD to return to the depositor
    pub withdrawn: TokenAmount,
    /// Deposit value after the operation
    pub new_deposit: TokenAmount,
    /// Deposit cancelled by offsets since the previous settlement
    pub stake_loss: TokenAmount,
    /// Collateral to pay out
    pub collateral_gain: CollateralAmount,
    /// ZERO to pay to the depositor
    pub zero_gain: ZeroTokenAmount,
    /// Front end the deposit is tagged with
    pub front_end: Option<AccountId>,
    /// ZERO to pay to the front end
    pub front_end_zero_gain: ZeroTokenAmount,
}

impl DepositorOutcome {
    /// Outcome of an operation on an account without a deposit
    pub fn empty(depositor: AccountId) -> Self {
        Self {
            depositor,
            deposited: TokenAmount::ZERO,
            withdrawn: TokenAmount::ZERO,
            new_deposit: TokenAmount::ZERO,
            stake_loss: TokenAmount::ZERO,
            collateral_gain: CollateralAmount::ZERO,
            zero_gain: ZeroTokenAmount::ZERO,
            front_end: None,
            front_end_zero_gain: ZeroTokenAmount::ZERO,
        }
    }
}

/// Result of an offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetOutcome {
    /// False when the pool was empty or the debt zero
    pub applied: bool,
    /// Debt cancelled
    pub debt: TokenAmount,
    /// Collateral received for depositors
    pub collateral: CollateralAmount,
    /// Fraction of every deposit cancelled
    pub loss_per_unit: FixedPoint,
    /// Product after the offset
    pub p: FixedPoint,
    /// Epoch after the offset
    pub epoch: u64,
    /// Scale after the offset
    pub scale: u64,
    /// Scale increments applied by this offset
    pub scale_crossings: u32,
    /// True when the pool was emptied
    pub epoch_advanced: bool,
    /// ZERO folded into `G` before the offset
    pub zero_issued: ZeroTokenAmount,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifetime counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Offsets applied
    pub offsets: u64,
    /// Debt cancelled by offsets
    pub total_debt_offset: TokenAmount,
    /// Collateral received from offsets
    pub total_collateral_received: CollateralAmount,
    /// Collateral paid to depositors or their lines of credit
    pub total_collateral_paid: CollateralAmount,
    /// ZUSD deposited
    pub total_deposited: TokenAmount,
    /// ZUSD withdrawn
    pub total_withdrawn: TokenAmount,
    /// ZERO folded into `G`
    pub zero_distributed: ZeroTokenAmount,
    /// ZERO issued while the pool was empty
    pub zero_undistributed: ZeroTokenAmount,
    /// ZERO paid to depositors and front ends
    pub zero_paid: ZeroTokenAmount,
    /// Epoch increments
    pub epoch_changes: u64,
    /// Scale increments
    pub scale_changes: u64,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatistics {
    /// ZUSD pooled
    pub total_pooled: TokenAmount,
    /// Collateral held for depositors
    pub total_collateral: CollateralAmount,
    /// Live deposits
    pub depositor_count: u64,
    /// Registered front ends
    pub front_end_count: u64,
    /// Running product
    pub p: FixedPoint,
    /// Current epoch
    pub epoch: u64,
    /// Current scale
    pub scale: u64,
    /// Lifetime counters
    pub stats: PoolStats,
}

/// Pooled totals compared with the sum over depositors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservationReport {
    /// Tracked ZUSD total
    pub total_pooled: TokenAmount,
    /// Sum of compounded deposits
    pub sum_compounded: TokenAmount,
    /// Tracked collateral
    pub total_collateral: CollateralAmount,
    /// Sum of unpaid collateral gains
    pub sum_collateral_gains: CollateralAmount,
    /// Live deposits
    pub depositors: usize,
}

impl ConservationReport {
    /// Distance between the tracked total and the sum of deposits
    pub fn deposit_gap(&self) -> u128 {
        abs_diff(self.total_pooled.raw(), self.sum_compounded.raw())
    }

    /// Collateral owed beyond what the pool holds
    pub fn collateral_shortfall(&self) -> u128 {
        self.sum_collateral_gains
            .raw()
            .saturating_sub(self.total_collateral.raw())
    }

    /// Both gaps within `tolerance` base units
    pub fn is_balanced(&self, tolerance: u128) -> bool {
        self.deposit_gap() <= tolerance && self.collateral_shortfall() <= tolerance
    }

    /// Bound on how far one offset can widen `deposit_gap`.
    ///
    /// The rounded-up loss costs at most one wei per token staked before the
    /// offset, and flooring the new `P` costs the stakes after it one unit of
    /// `P` each.
    pub fn offset_allowance(
        pooled_before: TokenAmount,
        pooled_after: TokenAmount,
        p_after: FixedPoint,
        depositors: usize,
    ) -> u128 {
        let p = p_after.raw().max(1);
        (pooled_before.raw() / DECIMAL_PRECISION)
            .saturating_add(pooled_after.raw() / p)
            .saturating_add(depositors as u128 + 1)
            .saturating_mul(4)
    }

    /// Bound on how far `amount` can widen `deposit_gap` if its stake is
    /// later zeroed as dust
    pub fn deposit_allowance(amount: TokenAmount) -> u128 {
        amount.raw() / DUST_DIVISOR + 4
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// The stability pool ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    params: PoolParams,
    withdrawal_policy: WithdrawalPolicy,
    state: GlobalState,
    deposits: BTreeMap<AccountId, DepositRecord>,
    front_ends: BTreeMap<AccountId, FrontEnd>,
    stats: PoolStats,
    #[serde(skip, default = "checks_enabled")]
    verify_offsets: bool,
    #[serde(skip)]
    events: EventLog,
}

fn checks_enabled() -> bool {
    true
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new(PoolParams::default())
    }
}

impl StabilityPool {
    /// Create an empty pool
    pub fn new(params: PoolParams) -> Self {
        Self {
            params,
            withdrawal_policy: WithdrawalPolicy::default(),
            state: GlobalState::new(),
            deposits: BTreeMap::new(),
            front_ends: BTreeMap::new(),
            stats: PoolStats::default(),
            verify_offsets: true,
            events: EventLog::default(),
        }
    }

    /// Create an empty pool from a validated configuration
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let mut pool = Self::new(config.params.clone());
        pool.apply_config(config);
        Ok(pool)
    }

    /// Adopt the operational settings of `config`.
    ///
    /// Algorithm parameters stay as they were when the pool was created.
    pub fn apply_config(&mut self, config: &PoolConfig) {
        self.withdrawal_policy = config.withdrawal_policy;
        self.verify_offsets = config.check_invariants;
        self.events = EventLog::new(config.event_retention);
    }

    /// Set the over-withdrawal policy
    pub fn set_withdrawal_policy(&mut self, policy: WithdrawalPolicy) {
        self.withdrawal_policy = policy;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PRECONDITIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Validate a deposit without changing anything
    pub fn check_provide(
        &self,
        depositor: &AccountId,
        amount: TokenAmount,
        front_end_tag: Option<&AccountId>,
    ) -> Result<()> {
        if let Some(tag) = front_end_tag {
            if !self.front_ends.contains_key(tag) {
                return Err(Error::FrontEndNotRegistered(tag.to_hex()));
            }
        }
        if self.front_ends.contains_key(depositor) {
            return Err(Error::FrontEndCannotDeposit(depositor.to_hex()));
        }
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        Ok(())
    }

    /// Validate a front-end registration without changing anything
    pub fn check_register_front_end(
        &self,
        account: &AccountId,
        kickback_rate: FixedPoint,
    ) -> Result<()> {
        if !kickback_rate.is_fraction() {
            return Err(Error::InvalidKickbackRate(kickback_rate.raw()));
        }
        if self.front_ends.contains_key(account) {
            return Err(Error::FrontEndAlreadyRegistered(account.to_hex()));
        }
        if self.has_deposit(account) {
            return Err(Error::DepositorCannotRegister(account.to_hex()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit with no front end and no ZERO issuance
    pub fn deposit(&mut self, depositor: AccountId, amount: TokenAmount) -> Result<DepositorOutcome> {
        self.provide(depositor, amount, None, || ZeroTokenAmount::ZERO)
    }

    /// Add `amount` to the depositor's stake.
    ///
    /// Pending gains are settled and returned for payout, never restaked.
    /// `front_end_tag` only applies when the depositor has no live deposit.
    /// `issue` is called once the request is known to be valid and returns
    /// the ZERO issued since the previous call.
    pub fn provide<F>(
        &mut self,
        depositor: AccountId,
        amount: TokenAmount,
        front_end_tag: Option<AccountId>,
        issue: F,
    ) -> Result<DepositorOutcome>
    where
        F: FnOnce() -> ZeroTokenAmount,
    {
        self.check_provide(&depositor, amount, front_end_tag.as_ref())?;

        let fresh = !self.deposits.contains_key(&depositor);
        let front_end = match self.deposits.get(&depositor) {
            Some(record) => record.front_end,
            None => front_end_tag,
        };

        let issued = issue();
        let issuance = self.state.plan_issuance(issued)?;
        let zero_sums = self.state.zero_sums(issuance.as_ref());

        let settlement = self.settle_with(&depositor, &zero_sums)?;
        let front_end_settlement = self.settle_front_end_with(front_end.as_ref(), &zero_sums)?;

        let new_deposit = settlement
            .compounded
            .checked_add(amount)
            .ok_or_else(|| overflow("deposit + amount"))?;
        let new_front_end_stake = front_end_settlement
            .as_ref()
            .map(|s| {
                s.compounded_stake
                    .checked_add(amount)
                    .ok_or_else(|| overflow("front end stake + amount"))
            })
            .transpose()?;
        let new_total = self
            .state
            .total_pooled()
            .checked_add(amount)
            .ok_or_else(|| overflow("total pooled + amount"))?;
        let (collateral_paid, new_collateral) = self.collateral_payout(settlement.collateral_gain);
        let snapshot = self.capture_snapshot(&zero_sums);

        // Commit
        self.commit_issuance(issued, issuance.as_ref());
        if fresh {
            if let Some(tag) = front_end {
                self.emit(PoolEvent::FrontEndTagSet {
                    depositor,
                    front_end: Some(tag),
                });
            }
        }
        if let (Some(s), Some(stake)) = (&front_end_settlement, new_front_end_stake) {
            self.write_front_end_stake(&s.front_end, stake, snapshot, depositor);
        }
        self.write_deposit(depositor, new_deposit, front_end, snapshot);
        self.write_total_pooled(new_total);
        self.write_collateral_payout(
            depositor,
            collateral_paid,
            new_collateral,
            settlement.stake_loss(),
            GainDestination::Depositor,
        );
        let front_end_zero_gain = self.record_zero_payouts(
            depositor,
            settlement.zero_gain,
            front_end_settlement.as_ref(),
        );
        self.stats.total_deposited = self.stats.total_deposited.saturating_add(amount);

        debug!(
            depositor = %depositor,
            amount = %amount,
            new_deposit = %new_deposit,
            collateral_gain = %collateral_paid,
            "deposit settled"
        );

        Ok(DepositorOutcome {
            depositor,
            deposited: amount,
            withdrawn: TokenAmount::ZERO,
            new_deposit,
            stake_loss: settlement.stake_loss(),
            collateral_gain: collateral_paid,
            zero_gain: settlement.zero_gain,
            front_end,
            front_end_zero_gain,
        })
    }

    /// Withdraw up to `amount` of the compounded deposit and all gains.
    ///
    /// Requests above the compounded deposit are clamped or rejected
    /// according to the withdrawal policy. An account without a deposit gets
    /// an all-zero outcome.
    pub fn withdraw<F>(&mut self, depositor: AccountId, amount: TokenAmount, issue: F) -> Result<DepositorOutcome>
    where
        F: FnOnce() -> ZeroTokenAmount,
    {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let record = match self.deposits.get(&depositor) {
            Some(record) => record.clone(),
            None => {
                debug!(depositor = %depositor, "withdrawal from account without deposit");
                return Ok(DepositorOutcome::empty(depositor));
            }
        };

        let compounded = record.compounded(&self.state, self.params.dust_divisor)?;
        let mut withdrawn = if amount > compounded {
            match self.withdrawal_policy {
                WithdrawalPolicy::Clamp => compounded,
                WithdrawalPolicy::Reject => {
                    return Err(Error::WithdrawalExceedsDeposit {
                        requested: amount.raw(),
                        available: compounded.raw(),
                    })
                }
            }
        } else {
            amount
        };
        if withdrawn > self.state.total_pooled() {
            warn!(
                withdrawn = %withdrawn,
                pooled = %self.state.total_pooled(),
                "withdrawal exceeds pooled total, clamping to pool"
            );
            withdrawn = self.state.total_pooled();
        }

        let issued = issue();
        let issuance = self.state.plan_issuance(issued)?;
        let zero_sums = self.state.zero_sums(issuance.as_ref());

        let settlement = self.settle_with(&depositor, &zero_sums)?;
        let front_end_settlement =
            self.settle_front_end_with(record.front_end.as_ref(), &zero_sums)?;

        let new_deposit = settlement.compounded.saturating_sub(withdrawn);
        let new_front_end_stake = front_end_settlement
            .as_ref()
            .map(|s| s.compounded_stake.saturating_sub(withdrawn));
        let new_total = self
            .state
            .total_pooled()
            .checked_sub(withdrawn)
            .ok_or_else(|| underflow("total pooled - withdrawal"))?;
        let (collateral_paid, new_collateral) = self.collateral_payout(settlement.collateral_gain);
        let snapshot = self.capture_snapshot(&zero_sums);

        // Commit
        self.commit_issuance(issued, issuance.as_ref());
        if let (Some(s), Some(stake)) = (&front_end_settlement, new_front_end_stake) {
            self.write_front_end_stake(&s.front_end, stake, snapshot, depositor);
        }
        self.write_deposit(depositor, new_deposit, record.front_end, snapshot);
        self.write_total_pooled(new_total);
        self.write_collateral_payout(
            depositor,
            collateral_paid,
            new_collateral,
            settlement.stake_loss(),
            GainDestination::Depositor,
        );
        let front_end_zero_gain = self.record_zero_payouts(
            depositor,
            settlement.zero_gain,
            front_end_settlement.as_ref(),
        );
        self.stats.total_withdrawn = self.stats.total_withdrawn.saturating_add(withdrawn);

        debug!(
            depositor = %depositor,
            requested = %amount,
            withdrawn = %withdrawn,
            new_deposit = %new_deposit,
            collateral_gain = %collateral_paid,
            "withdrawal settled"
        );

        Ok(DepositorOutcome {
            depositor,
            deposited: TokenAmount::ZERO,
            withdrawn,
            new_deposit,
            stake_loss: settlement.stake_loss(),
            collateral_gain: collateral_paid,
            zero_gain: settlement.zero_gain,
            front_end: record.front_end,
            front_end_zero_gain,
        })
    }

    /// Pay out accrued gains only; the stake is re-snapshotted at its
    /// compounded value and keeps compounding
    pub fn withdraw_gains<F>(
        &mut self,
        depositor: AccountId,
        destination: GainDestination,
        issue: F,
    ) -> Result<DepositorOutcome>
    where
        F: FnOnce() -> ZeroTokenAmount,
    {
        let record = match self.deposits.get(&depositor) {
            Some(record) => record.clone(),
            None => return Ok(DepositorOutcome::empty(depositor)),
        };

        let issued = issue();
        let issuance = self.state.plan_issuance(issued)?;
        let zero_sums = self.state.zero_sums(issuance.as_ref());

        let settlement = self.settle_with(&depositor, &zero_sums)?;
        let front_end_settlement =
            self.settle_front_end_with(record.front_end.as_ref(), &zero_sums)?;
        let (collateral_paid, new_collateral) = self.collateral_payout(settlement.collateral_gain);
        let snapshot = self.capture_snapshot(&zero_sums);

        // Commit
        self.commit_issuance(issued, issuance.as_ref());
        if let Some(s) = &front_end_settlement {
            self.write_front_end_stake(&s.front_end, s.compounded_stake, snapshot, depositor);
        }
        self.write_deposit(depositor, settlement.compounded, record.front_end, snapshot);
        self.write_collateral_payout(
            depositor,
            collateral_paid,
            new_collateral,
            settlement.stake_loss(),
            destination,
        );
        let front_end_zero_gain = self.record_zero_payouts(
            depositor,
            settlement.zero_gain,
            front_end_settlement.as_ref(),
        );

        debug!(
            depositor = %depositor,
            destination = ?destination,
            collateral_gain = %collateral_paid,
            zero_gain = %settlement.zero_gain,
            "gains withdrawn"
        );

        Ok(DepositorOutcome {
            depositor,
            deposited: TokenAmount::ZERO,
            withdrawn: TokenAmount::ZERO,
            new_deposit: settlement.compounded,
            stake_loss: settlement.stake_loss(),
            collateral_gain: collateral_paid,
            zero_gain: settlement.zero_gain,
            front_end: record.front_end,
            front_end_zero_gain,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRONT ENDS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register `account` as a front end passing `kickback_rate` of ZERO
    /// rewards on to its depositors
    pub fn register_front_end(&mut self, account: AccountId, kickback_rate: FixedPoint) -> Result<()> {
        self.check_register_front_end(&account, kickback_rate)?;
        self.front_ends.insert(account, FrontEnd::new(kickback_rate));
        self.emit(PoolEvent::FrontEndRegistered {
            front_end: account,
            kickback_rate,
        });
        info!(front_end = %account, kickback_rate = %kickback_rate, "front end registered");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OFFSET
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cancel `debt` against the pooled deposits and distribute `collateral`
    /// to the depositors pro rata.
    ///
    /// A no-op on an empty pool or for zero debt.
    pub fn offset<F>(&mut self, debt: TokenAmount, collateral: CollateralAmount, issue: F) -> Result<OffsetOutcome>
    where
        F: FnOnce() -> ZeroTokenAmount,
    {
        let total = self.state.total_pooled();
        if total.is_zero() || debt.is_zero() {
            warn!(debt = %debt, pooled = %total, "offset skipped");
            return Ok(OffsetOutcome {
                applied: false,
                debt,
                collateral,
                loss_per_unit: FixedPoint::ZERO,
                p: self.state.p(),
                epoch: self.state.epoch(),
                scale: self.state.scale(),
                scale_crossings: 0,
                epoch_advanced: false,
                zero_issued: ZeroTokenAmount::ZERO,
            });
        }
        if debt > total {
            return Err(Error::OffsetExceedsPool {
                debt: debt.raw(),
                pooled: total.raw(),
            });
        }

        let plan = self
            .state
            .plan_offset(debt, collateral, self.params.max_scale_crossings)?;
        if self.verify_offsets {
            self.state.preview_offset(&plan).map_err(|e| {
                error!(debt = %debt, error = %e, "offset rejected before commit");
                e
            })?;
        }
        let issued = issue();
        let issuance = self.state.plan_issuance(issued)?;

        // Commit
        self.commit_issuance(issued, issuance.as_ref());
        self.state.apply_offset(&plan);

        self.emit(PoolEvent::Offset { debt, collateral });
        self.emit(PoolEvent::SumUpdated {
            epoch: plan.sum_epoch,
            scale: plan.sum_scale,
            sum: plan.new_sum,
        });
        self.emit(PoolEvent::ProductUpdated { p: plan.new_p });
        if plan.advances_epoch() {
            self.emit(PoolEvent::EpochUpdated {
                epoch: plan.new_epoch,
            });
            self.emit(PoolEvent::ScaleUpdated { scale: 0 });
            self.stats.epoch_changes += 1;
            info!(epoch = plan.new_epoch, "pool emptied, epoch advanced");
        } else if plan.scale_crossings > 0 {
            self.emit(PoolEvent::ScaleUpdated {
                scale: plan.new_scale,
            });
            self.stats.scale_changes += u64::from(plan.scale_crossings);
            info!(
                scale = plan.new_scale,
                crossings = plan.scale_crossings,
                p = %plan.new_p,
                "scale advanced"
            );
        }
        self.emit(PoolEvent::PoolBalanceUpdated {
            total: plan.new_total_pooled,
        });
        self.emit(PoolEvent::PoolCollateralUpdated {
            total: plan.new_total_collateral,
        });

        self.stats.offsets += 1;
        self.stats.total_debt_offset = self.stats.total_debt_offset.saturating_add(debt);
        self.stats.total_collateral_received =
            self.stats.total_collateral_received.saturating_add(collateral);

        info!(
            debt = %debt,
            collateral = %collateral,
            loss_per_unit = %plan.loss_per_unit,
            pooled = %plan.new_total_pooled,
            "offset applied"
        );

        Ok(OffsetOutcome {
            applied: true,
            debt,
            collateral,
            loss_per_unit: plan.loss_per_unit,
            p: plan.new_p,
            epoch: plan.new_epoch,
            scale: plan.new_scale,
            scale_crossings: plan.scale_crossings,
            epoch_advanced: plan.advances_epoch(),
            zero_issued: issuance.map(|p| p.issued).unwrap_or(ZeroTokenAmount::ZERO),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SETTLEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Value a depositor's position without changing anything
    pub fn settle(&self, depositor: &AccountId) -> Result<Settlement> {
        self.settle_with(depositor, &self.state.zero_sums(None))
    }

    fn settle_with(&self, depositor: &AccountId, zero_sums: &SumView<'_>) -> Result<Settlement> {
        let record = match self.deposits.get(depositor) {
            Some(record) => record,
            None => return Ok(Settlement::empty(*depositor)),
        };
        let kickback_rate = self.kickback_rate(record.front_end.as_ref());
        Ok(Settlement {
            depositor: *depositor,
            initial: record.initial,
            compounded: record.compounded(&self.state, self.params.dust_divisor)?,
            collateral_gain: record.collateral_gain(&self.state)?,
            zero_gain: record.zero_gain(zero_sums, kickback_rate)?,
            front_end: record.front_end,
        })
    }

    fn settle_front_end_with(
        &self,
        front_end: Option<&AccountId>,
        zero_sums: &SumView<'_>,
    ) -> Result<Option<FrontEndSettlement>> {
        let account = match front_end {
            Some(account) => account,
            None => return Ok(None),
        };
        let entry = self
            .front_ends
            .get(account)
            .ok_or_else(|| Error::FrontEndNotRegistered(account.to_hex()))?;
        Ok(Some(FrontEndSettlement {
            front_end: *account,
            compounded_stake: entry.compounded_stake(&self.state, self.params.dust_divisor)?,
            zero_gain: entry.zero_gain(zero_sums)?,
        }))
    }

    fn kickback_rate(&self, front_end: Option<&AccountId>) -> FixedPoint {
        front_end
            .and_then(|account| self.front_ends.get(account))
            .map(|entry| entry.kickback_rate)
            .unwrap_or(FixedPoint::ONE)
    }

    fn capture_snapshot(&self, zero_sums: &SumView<'_>) -> Snapshot {
        let (epoch, scale) = (self.state.epoch(), self.state.scale());
        Snapshot {
            p: self.state.p(),
            s: self.state.collateral_sum(epoch, scale),
            g: zero_sums.get(epoch, scale),
            epoch,
            scale,
        }
    }

    /// Collateral actually paid and the pool's collateral afterwards
    fn collateral_payout(&self, gain: CollateralAmount) -> (CollateralAmount, CollateralAmount) {
        let held = self.state.total_collateral();
        if gain > held {
            warn!(gain = %gain, held = %held, "collateral gain exceeds pool collateral, clamping");
            return (held, CollateralAmount::ZERO);
        }
        (gain, held.saturating_sub(gain))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMMIT HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn emit(&mut self, event: PoolEvent) {
        self.events.push(event);
    }

    fn commit_issuance(&mut self, issued: ZeroTokenAmount, plan: Option<&IssuancePlan>) {
        match plan {
            Some(plan) => {
                self.state.apply_issuance(plan);
                self.stats.zero_distributed = self.stats.zero_distributed.saturating_add(issued);
                self.emit(PoolEvent::ZeroSumUpdated {
                    epoch: plan.epoch,
                    scale: plan.scale,
                    sum: plan.new_sum,
                });
            }
            None if !issued.is_zero() => {
                warn!(issued = %issued, "ZERO issued while pool is empty");
                self.stats.zero_undistributed = self.stats.zero_undistributed.saturating_add(issued);
            }
            None => {}
        }
    }

    fn write_deposit(
        &mut self,
        depositor: AccountId,
        new_deposit: TokenAmount,
        front_end: Option<AccountId>,
        snapshot: Snapshot,
    ) {
        if new_deposit.is_zero() {
            if let Some(removed) = self.deposits.remove(&depositor) {
                if removed.front_end.is_some() {
                    self.emit(PoolEvent::FrontEndTagSet {
                        depositor,
                        front_end: None,
                    });
                }
            }
            self.emit(PoolEvent::DepositUpdated {
                depositor,
                new_deposit,
            });
            return;
        }

        self.deposits
            .insert(depositor, DepositRecord::new(new_deposit, front_end, snapshot));
        self.emit(PoolEvent::DepositUpdated {
            depositor,
            new_deposit,
        });
        self.emit(PoolEvent::DepositSnapshotUpdated {
            depositor,
            p: snapshot.p,
            s: snapshot.s,
            g: snapshot.g,
        });
    }

    fn write_front_end_stake(
        &mut self,
        front_end: &AccountId,
        new_stake: TokenAmount,
        snapshot: Snapshot,
        depositor: AccountId,
    ) {
        if let Some(entry) = self.front_ends.get_mut(front_end) {
            entry.stake = new_stake;
            entry.snapshot = if new_stake.is_zero() {
                FrontEndSnapshot::default()
            } else {
                FrontEndSnapshot::from(snapshot)
            };
            self.emit(PoolEvent::FrontEndStakeChanged {
                front_end: *front_end,
                new_stake,
                depositor,
            });
        }
    }

    fn write_total_pooled(&mut self, total: TokenAmount) {
        self.state.set_total_pooled(total);
        self.emit(PoolEvent::PoolBalanceUpdated { total });
    }

    fn write_collateral_payout(
        &mut self,
        depositor: AccountId,
        paid: CollateralAmount,
        new_total: CollateralAmount,
        stake_loss: TokenAmount,
        destination: GainDestination,
    ) {
        if paid.is_zero() && stake_loss.is_zero() {
            return;
        }
        self.state.set_total_collateral(new_total);
        self.stats.total_collateral_paid = self.stats.total_collateral_paid.saturating_add(paid);
        match destination {
            GainDestination::Depositor => self.emit(PoolEvent::CollateralGainWithdrawn {
                depositor,
                gain: paid,
                stake_loss,
            }),
            GainDestination::LineOfCredit => self.emit(PoolEvent::CollateralGainToLineOfCredit {
                depositor,
                gain: paid,
            }),
        }
        if !paid.is_zero() {
            self.emit(PoolEvent::PoolCollateralUpdated { total: new_total });
        }
    }

    /// Record ZERO payouts, returning the front end's share
    fn record_zero_payouts(
        &mut self,
        depositor: AccountId,
        depositor_gain: ZeroTokenAmount,
        front_end: Option<&FrontEndSettlement>,
    ) -> ZeroTokenAmount {
        if !depositor_gain.is_zero() {
            self.stats.zero_paid = self.stats.zero_paid.saturating_add(depositor_gain);
            self.emit(PoolEvent::ZeroPaidToDepositor {
                depositor,
                amount: depositor_gain,
            });
        }
        match front_end {
            Some(s) if !s.zero_gain.is_zero() => {
                self.stats.zero_paid = self.stats.zero_paid.saturating_add(s.zero_gain);
                self.emit(PoolEvent::ZeroPaidToFrontEnd {
                    front_end: s.front_end,
                    amount: s.zero_gain,
                });
                s.zero_gain
            }
            _ => ZeroTokenAmount::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Current value of a deposit
    pub fn compounded_deposit(&self, depositor: &AccountId) -> Result<TokenAmount> {
        match self.deposits.get(depositor) {
            Some(record) => record.compounded(&self.state, self.params.dust_divisor),
            None => Ok(TokenAmount::ZERO),
        }
    }

    /// Collateral a depositor would receive now
    pub fn depositor_collateral_gain(&self, depositor: &AccountId) -> Result<CollateralAmount> {
        match self.deposits.get(depositor) {
            Some(record) => record.collateral_gain(&self.state),
            None => Ok(CollateralAmount::ZERO),
        }
    }

    /// ZERO a depositor would receive now
    pub fn depositor_zero_gain(&self, depositor: &AccountId) -> Result<ZeroTokenAmount> {
        match self.deposits.get(depositor) {
            Some(record) => record.zero_gain(
                &self.state.zero_sums(None),
                self.kickback_rate(record.front_end.as_ref()),
            ),
            None => Ok(ZeroTokenAmount::ZERO),
        }
    }

    /// Current value of a front end's stake
    pub fn compounded_front_end_stake(&self, front_end: &AccountId) -> Result<TokenAmount> {
        match self.front_ends.get(front_end) {
            Some(entry) => entry.compounded_stake(&self.state, self.params.dust_divisor),
            None => Ok(TokenAmount::ZERO),
        }
    }

    /// ZERO a front end would receive now
    pub fn front_end_zero_gain(&self, front_end: &AccountId) -> Result<ZeroTokenAmount> {
        match self.front_ends.get(front_end) {
            Some(entry) => entry.zero_gain(&self.state.zero_sums(None)),
            None => Ok(ZeroTokenAmount::ZERO),
        }
    }

    /// Registered front end
    pub fn front_end(&self, account: &AccountId) -> Option<&FrontEnd> {
        self.front_ends.get(account)
    }

    /// Stored record of a depositor
    pub fn deposit_record(&self, depositor: &AccountId) -> Option<&DepositRecord> {
        self.deposits.get(depositor)
    }

    /// Check whether an account holds a live deposit
    pub fn has_deposit(&self, depositor: &AccountId) -> bool {
        self.deposits.contains_key(depositor)
    }

    /// Accounts with a live deposit, in address order
    pub fn depositors(&self) -> impl Iterator<Item = &AccountId> {
        self.deposits.keys()
    }

    /// Number of live deposits
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Total ZUSD pooled
    pub fn total_pooled(&self) -> TokenAmount {
        self.state.total_pooled()
    }

    /// Collateral held for depositors
    pub fn total_collateral(&self) -> CollateralAmount {
        self.state.total_collateral()
    }

    /// Current epoch
    pub fn current_epoch(&self) -> u64 {
        self.state.epoch()
    }

    /// Current scale
    pub fn current_scale(&self) -> u64 {
        self.state.scale()
    }

    /// Running product
    pub fn p(&self) -> FixedPoint {
        self.state.p()
    }

    /// `S[epoch][scale]`
    pub fn sum_at(&self, epoch: u64, scale: u64) -> U256 {
        self.state.collateral_sum(epoch, scale)
    }

    /// `G[epoch][scale]`
    pub fn zero_sum_at(&self, epoch: u64, scale: u64) -> U256 {
        self.state.zero_sum(epoch, scale)
    }

    /// Global accumulators
    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    /// Algorithm parameters
    pub fn params(&self) -> &PoolParams {
        &self.params
    }

    /// Over-withdrawal policy in force
    pub fn withdrawal_policy(&self) -> WithdrawalPolicy {
        self.withdrawal_policy
    }

    /// Lifetime counters
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Get pool statistics
    pub fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            total_pooled: self.state.total_pooled(),
            total_collateral: self.state.total_collateral(),
            depositor_count: self.deposits.len() as u64,
            front_end_count: self.front_ends.len() as u64,
            p: self.state.p(),
            epoch: self.state.epoch(),
            scale: self.state.scale(),
            stats: self.stats.clone(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Buffered events
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Remove and return buffered events
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.events.drain()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // AUDIT
    // ═══════════════════════════════════════════════════════════════════════════

    /// O(1) invariant checks, cheap enough to run after every mutation
    pub fn check_invariants(&self) -> Result<()> {
        self.state.check_invariants()
    }

    /// Compare pooled totals with the sum over all depositors (O(n))
    pub fn check_conservation(&self) -> Result<ConservationReport> {
        let mut sum_compounded = TokenAmount::ZERO;
        let mut sum_gains = CollateralAmount::ZERO;
        for (depositor, record) in &self.deposits {
            if record.snapshot.epoch > self.state.epoch() {
                return Err(Error::InvariantViolation(format!(
                    "deposit of {} snapshotted in future epoch {}",
                    depositor, record.snapshot.epoch
                )));
            }
            let compounded = record.compounded(&self.state, self.params.dust_divisor)?;
            if compounded > record.initial {
                return Err(Error::InvariantViolation(format!(
                    "deposit of {} grew from {} to {}",
                    depositor, record.initial, compounded
                )));
            }
            sum_compounded = sum_compounded.saturating_add(compounded);
            sum_gains = sum_gains.saturating_add(record.collateral_gain(&self.state)?);
        }

        Ok(ConservationReport {
            total_pooled: self.state.total_pooled(),
            sum_compounded,
            total_collateral: self.state.total_collateral(),
            sum_collateral_gains: sum_gains,
            depositors: self.deposits.len(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// SHA256 over the serialized ledger (events excluded)
    pub fn state_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.to_bytes()?))
    }
}

fn overflow(operation: &str) -> Error {
    Error::Overflow {
        operation: operation.to_string(),
    }
}

fn underflow(operation: &str) -> Error {
    Error::Underflow {
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::*;

    fn account(label: &str) -> AccountId {
        AccountId::from_label(label)
    }

    fn whole(units: u64) -> TokenAmount {
        TokenAmount::from_whole(units)
    }

    fn no_issuance() -> ZeroTokenAmount {
        ZeroTokenAmount::ZERO
    }

    fn offset(pool: &mut StabilityPool, debt: TokenAmount, collateral: CollateralAmount) -> OffsetOutcome {
        pool.offset(debt, collateral, no_issuance).unwrap()
    }

    #[test]
    fn test_deposit() {
        let mut pool = StabilityPool::default();
        let alice = account("alice");

        let outcome = pool.deposit(alice, whole(1_000)).unwrap();
        assert_eq!(outcome.new_deposit, whole(1_000));
        assert!(outcome.collateral_gain.is_zero());
        assert_eq!(pool.total_pooled(), whole(1_000));
        assert_eq!(pool.depositor_count(), 1);
        assert_eq!(pool.compounded_deposit(&alice).unwrap(), whole(1_000));
    }

    #[test]
    fn test_deposit_zero_rejected() {
        let mut pool = StabilityPool::default();
        let result = pool.deposit(account("alice"), TokenAmount::ZERO);
        assert_eq!(result, Err(Error::ZeroAmount));
        assert_eq!(pool.depositor_count(), 0);
    }

    #[test]
    fn test_three_depositor_scenario() {
        let mut pool = StabilityPool::default();
        let depositors = [account("alice"), account("bob"), account("carol")];
        for depositor in depositors {
            pool.deposit(depositor, whole(10_000)).unwrap();
        }

        let outcome = offset(&mut pool, whole(10_000), CollateralAmount::parse("99.5").unwrap());
        assert!(outcome.applied);
        assert_eq!(pool.total_pooled(), whole(20_000));

        for depositor in &depositors {
            let compounded = pool.compounded_deposit(depositor).unwrap();
            let gain = pool.depositor_collateral_gain(depositor).unwrap();
            assert!(abs_diff(compounded.raw(), 6_666_666_666_666_666_666_666) < 10_000);
            assert!(abs_diff(gain.raw(), 33_166_666_666_666_666_667) < 10_000);
        }
    }

    #[test]
    fn test_offset_on_empty_pool_is_noop() {
        let mut pool = StabilityPool::default();
        let before = pool.to_bytes().unwrap();

        let outcome = offset(&mut pool, whole(100), CollateralAmount::from_whole(1));
        assert!(!outcome.applied);
        assert_eq!(pool.to_bytes().unwrap(), before);
    }

    #[test]
    fn test_offset_zero_debt_is_noop() {
        let mut pool = StabilityPool::default();
        pool.deposit(account("alice"), whole(100)).unwrap();
        let before = pool.to_bytes().unwrap();

        let mut issued = false;
        let outcome = pool
            .offset(TokenAmount::ZERO, CollateralAmount::from_whole(1), || {
                issued = true;
                ZeroTokenAmount::from_whole(5)
            })
            .unwrap();
        assert!(!outcome.applied);
        assert!(!issued);
        assert_eq!(pool.to_bytes().unwrap(), before);
    }

    #[test]
    fn test_offset_exceeding_pool_rejected() {
        let mut pool = StabilityPool::default();
        pool.deposit(account("alice"), whole(100)).unwrap();
        let before = pool.to_bytes().unwrap();

        let result = pool.offset(whole(101), CollateralAmount::ZERO, no_issuance);
        assert!(matches!(result, Err(Error::OffsetExceedsPool { .. })));
        assert_eq!(pool.to_bytes().unwrap(), before);
    }

    #[test]
    fn test_proportional_losses_and_gains() {
        let mut pool = StabilityPool::default();
        let (alice, bob) = (account("alice"), account("bob"));
        pool.deposit(alice, whole(100)).unwrap();
        pool.deposit(bob, whole(300)).unwrap();

        offset(&mut pool, whole(200), CollateralAmount::from_whole(4));

        let alice_deposit = pool.compounded_deposit(&alice).unwrap();
        let bob_deposit = pool.compounded_deposit(&bob).unwrap();
        assert_eq!(bob_deposit.raw(), 3 * alice_deposit.raw());
        assert_eq!(alice_deposit.raw(), 50 * DECIMAL_PRECISION - 100);

        assert_eq!(pool.depositor_collateral_gain(&alice).unwrap(), CollateralAmount::from_whole(1));
        assert_eq!(pool.depositor_collateral_gain(&bob).unwrap(), CollateralAmount::from_whole(3));
    }

    #[test]
    fn test_full_offset_wipes_epoch_and_keeps_gains() {
        let mut pool = StabilityPool::default();
        let (alice, bob, carol) = (account("alice"), account("bob"), account("carol"));
        pool.deposit(alice, whole(100)).unwrap();
        pool.deposit(bob, whole(100)).unwrap();

        let outcome = offset(&mut pool, whole(200), CollateralAmount::from_whole(2));
        assert!(outcome.epoch_advanced);
        assert_eq!(pool.current_epoch(), 1);
        assert_eq!(pool.current_scale(), 0);
        assert_eq!(pool.p(), FixedPoint::ONE);
        assert!(pool.total_pooled().is_zero());

        for depositor in [&alice, &bob] {
            assert!(pool.compounded_deposit(depositor).unwrap().is_zero());
            assert_eq!(
                pool.depositor_collateral_gain(depositor).unwrap(),
                CollateralAmount::from_whole(1)
            );
        }

        // the next epoch works like a fresh pool
        pool.deposit(carol, whole(50)).unwrap();
        offset(&mut pool, whole(25), CollateralAmount::from_whole(1));
        assert_eq!(pool.compounded_deposit(&carol).unwrap().raw(), 25 * DECIMAL_PRECISION - 50);
        assert_eq!(pool.depositor_collateral_gain(&carol).unwrap(), CollateralAmount::from_whole(1));
        assert_eq!(
            pool.depositor_collateral_gain(&alice).unwrap(),
            CollateralAmount::from_whole(1)
        );

        // a wiped depositor withdraws only the gain
        let outcome = pool.withdraw(alice, whole(100), no_issuance).unwrap();
        assert!(outcome.withdrawn.is_zero());
        assert_eq!(outcome.collateral_gain, CollateralAmount::from_whole(1));
        assert!(!pool.has_deposit(&alice));

        // a second wipe-out moves to epoch 2
        let total = pool.total_pooled();
        offset(&mut pool, total, CollateralAmount::ZERO);
        assert_eq!(pool.current_epoch(), 2);
        assert!(pool.compounded_deposit(&carol).unwrap().is_zero());
    }

    #[test]
    fn test_top_up_pays_gain_and_compounds() {
        let mut pool = StabilityPool::default();
        let alice = account("alice");
        pool.deposit(alice, whole(100)).unwrap();
        offset(&mut pool, whole(50), CollateralAmount::from_whole(1));

        let outcome = pool.deposit(alice, whole(10)).unwrap();
        assert_eq!(outcome.collateral_gain, CollateralAmount::from_whole(1));
        assert_eq!(outcome.stake_loss.raw(), 50 * DECIMAL_PRECISION + 100);
        assert_eq!(outcome.new_deposit.raw(), 60 * DECIMAL_PRECISION - 100);
        assert_eq!(pool.total_pooled(), whole(60));
        assert!(pool.depositor_collateral_gain(&alice).unwrap().is_zero());
        assert!(pool.total_collateral().is_zero());
    }

    #[test]
    fn test_withdraw_clamps_by_default() {
        let mut pool = StabilityPool::default();
        let alice = account("alice");
        pool.deposit(alice, whole(100)).unwrap();
        pool.deposit(account("bob"), whole(100)).unwrap();
        offset(&mut pool, whole(100), CollateralAmount::ZERO);

        let compounded = pool.compounded_deposit(&alice).unwrap();
        let outcome = pool.withdraw(alice, whole(1_000), no_issuance).unwrap();
        assert_eq!(outcome.withdrawn, compounded);
        assert!(outcome.new_deposit.is_zero());
        assert!(!pool.has_deposit(&alice));
        assert_eq!(pool.total_pooled().raw(), 100 * DECIMAL_PRECISION - compounded.raw());
    }

    #[test]
    fn test_withdraw_reject_policy() {
        let mut pool = StabilityPool::default();
        pool.set_withdrawal_policy(WithdrawalPolicy::Reject);
        let alice = account("alice");
        pool.deposit(alice, whole(100)).unwrap();

        let result = pool.withdraw(alice, whole(101), no_issuance);
        assert!(matches!(result, Err(Error::WithdrawalExceedsDeposit { .. })));
        assert_eq!(pool.compounded_deposit(&alice).unwrap(), whole(100));

        let outcome = pool.withdraw(alice, whole(40), no_issuance).unwrap();
        assert_eq!(outcome.withdrawn, whole(40));
        assert_eq!(outcome.new_deposit, whole(60));
        assert_eq!(pool.total_pooled(), whole(60));
    }

    #[test]
    fn test_withdraw_without_deposit_is_zero() {
        let mut pool = StabilityPool::default();
        let outcome = pool.withdraw(account("nobody"), whole(1), no_issuance).unwrap();
        assert_eq!(outcome, DepositorOutcome::empty(account("nobody")));
        assert_eq!(pool.withdraw(account("nobody"), TokenAmount::ZERO, no_issuance), Err(Error::ZeroAmount));
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let mut pool = StabilityPool::default();
        let alice = account("alice");
        pool.deposit(alice, whole(100)).unwrap();
        pool.deposit(account("bob"), whole(100)).unwrap();
        offset(&mut pool, whole(30), CollateralAmount::from_whole(1));

        assert_eq!(pool.settle(&alice).unwrap(), pool.settle(&alice).unwrap());

        let first = pool
            .withdraw_gains(alice, GainDestination::Depositor, no_issuance)
            .unwrap();
        assert!(!first.collateral_gain.is_zero());
        let compounded = pool.compounded_deposit(&alice).unwrap();

        let second = pool
            .withdraw_gains(alice, GainDestination::Depositor, no_issuance)
            .unwrap();
        assert!(second.collateral_gain.is_zero());
        assert!(second.stake_loss.is_zero());
        assert_eq!(pool.compounded_deposit(&alice).unwrap(), compounded);
    }

    #[test]
    fn test_single_scale_crossing_and_dust() {
        let mut pool = StabilityPool::default();
        let (alice, bob) = (account("alice"), account("bob"));
        pool.deposit(alice, whole(10_000)).unwrap();

        // leaves P = 5e9 with alice's deposit at 5e13 wei
        offset(&mut pool, TokenAmount::from_raw(10_000 * DECIMAL_PRECISION - 50_000_000_000_001), CollateralAmount::ZERO);
        assert_eq!(pool.p().raw(), 5_000_000_000);
        assert_eq!(pool.compounded_deposit(&alice).unwrap().raw(), 50_000_000_000_000);

        pool.deposit(bob, whole(1_000)).unwrap();
        let total = pool.total_pooled().raw();
        let outcome = offset(&mut pool, TokenAmount::from_raw(total * 9 / 10), CollateralAmount::from_whole(9));
        assert_eq!(outcome.scale_crossings, 1);
        assert_eq!(pool.current_scale(), 1);
        assert_eq!(pool.p().raw(), 500_000_000_000_000_000);

        // bob keeps exactly a tenth
        assert_eq!(pool.compounded_deposit(&bob).unwrap(), whole(100));
        // alice is below initial / 1e9 and counts as dust
        assert!(pool.compounded_deposit(&alice).unwrap().is_zero());
        // bob earns nearly all of the collateral
        let gain = pool.depositor_collateral_gain(&bob).unwrap().raw();
        assert!(gain <= 9 * DECIMAL_PRECISION);
        assert!(gain > 9 * DECIMAL_PRECISION - 1_000_000_000_000);
    }

    #[test]
    fn test_double_scale_crossing_zeroes_old_deposits() {
        let mut pool = StabilityPool::default();
        let alice = account("alice");
        pool.deposit(alice, whole(10_000)).unwrap();
        offset(&mut pool, TokenAmount::from_raw(10_000 * DECIMAL_PRECISION - 50_000_000_000_001), CollateralAmount::ZERO);

        let total = pool.total_pooled().raw();
        let outcome = offset(&mut pool, TokenAmount::from_raw(total - 5_000), CollateralAmount::from_whole(1));
        assert_eq!(outcome.scale_crossings, 2);
        assert_eq!(pool.current_scale(), 2);
        assert_eq!(pool.current_epoch(), 0);
        assert!(pool.compounded_deposit(&alice).unwrap().is_zero());
        assert_eq!(pool.total_pooled().raw(), 5_000);
        assert!(pool.check_invariants().is_ok());

        // the gain of the deep offset is still credited
        let gain = pool.depositor_collateral_gain(&alice).unwrap().raw();
        assert!(gain <= DECIMAL_PRECISION);
        assert!(gain > DECIMAL_PRECISION - 1_000_000_000);
    }

    #[test]
    fn test_front_end_registration_rules() {
        let mut pool = StabilityPool::default();
        let (front_end, alice) = (account("frontend"), account("alice"));

        assert!(matches!(
            pool.register_front_end(front_end, FixedPoint::from_raw(DECIMAL_PRECISION + 1)),
            Err(Error::InvalidKickbackRate(_))
        ));
        pool.register_front_end(front_end, FixedPoint::from_percentage(90)).unwrap();
        assert!(matches!(
            pool.register_front_end(front_end, FixedPoint::ONE),
            Err(Error::FrontEndAlreadyRegistered(_))
        ));

        pool.deposit(alice, whole(10)).unwrap();
        assert!(matches!(
            pool.register_front_end(alice, FixedPoint::ONE),
            Err(Error::DepositorCannotRegister(_))
        ));
        assert!(matches!(
            pool.deposit(front_end, whole(10)),
            Err(Error::FrontEndCannotDeposit(_))
        ));
        assert!(matches!(
            pool.provide(account("bob"), whole(10), Some(account("unknown")), no_issuance),
            Err(Error::FrontEndNotRegistered(_))
        ));
    }

    #[test]
    fn test_zero_issuance_split_by_kickback() {
        let mut pool = StabilityPool::default();
        let (front_end, alice, bob) = (account("frontend"), account("alice"), account("bob"));
        pool.register_front_end(front_end, FixedPoint::from_percentage(60)).unwrap();

        pool.provide(alice, whole(100), Some(front_end), no_issuance).unwrap();
        pool.provide(bob, whole(100), None, no_issuance).unwrap();

        let outcome = pool
            .withdraw_gains(alice, GainDestination::Depositor, || ZeroTokenAmount::from_whole(20))
            .unwrap();
        assert_eq!(outcome.front_end, Some(front_end));
        assert_eq!(outcome.zero_gain, ZeroTokenAmount::from_whole(6));
        assert_eq!(outcome.front_end_zero_gain, ZeroTokenAmount::from_whole(4));

        // bob is untagged and keeps his whole share
        assert_eq!(pool.depositor_zero_gain(&bob).unwrap(), ZeroTokenAmount::from_whole(10));
        assert!(pool.depositor_zero_gain(&alice).unwrap().is_zero());
        assert!(pool.front_end_zero_gain(&front_end).unwrap().is_zero());
        assert_eq!(pool.stats().zero_distributed, ZeroTokenAmount::from_whole(20));
    }

    #[test]
    fn test_issuance_into_empty_pool_is_undistributed() {
        let mut pool = StabilityPool::default();
        pool.provide(account("alice"), whole(1), None, || ZeroTokenAmount::from_whole(3))
            .unwrap();
        assert_eq!(pool.stats().zero_undistributed, ZeroTokenAmount::from_whole(3));
        assert!(pool.depositor_zero_gain(&account("alice")).unwrap().is_zero());
    }

    #[test]
    fn test_front_end_stake_follows_tagged_deposits() {
        let mut pool = StabilityPool::default();
        let (front_end, alice) = (account("frontend"), account("alice"));
        pool.register_front_end(front_end, FixedPoint::from_percentage(50)).unwrap();

        pool.provide(alice, whole(100), Some(front_end), no_issuance).unwrap();
        assert_eq!(pool.compounded_front_end_stake(&front_end).unwrap(), whole(100));

        offset(&mut pool, whole(50), CollateralAmount::ZERO);
        assert_eq!(
            pool.compounded_front_end_stake(&front_end).unwrap(),
            pool.compounded_deposit(&alice).unwrap()
        );

        pool.withdraw(alice, whole(1_000), no_issuance).unwrap();
        assert!(pool.compounded_front_end_stake(&front_end).unwrap().is_zero());
        assert!(pool.deposit_record(&alice).is_none());
    }

    #[test]
    fn test_tag_only_set_on_fresh_deposit() {
        let mut pool = StabilityPool::default();
        let (first, second, alice) = (account("first"), account("second"), account("alice"));
        pool.register_front_end(first, FixedPoint::ONE).unwrap();
        pool.register_front_end(second, FixedPoint::ONE).unwrap();

        pool.provide(alice, whole(10), Some(first), no_issuance).unwrap();
        let outcome = pool.provide(alice, whole(10), Some(second), no_issuance).unwrap();
        assert_eq!(outcome.front_end, Some(first));
        assert_eq!(pool.compounded_front_end_stake(&first).unwrap(), whole(20));
        assert!(pool.compounded_front_end_stake(&second).unwrap().is_zero());
    }

    #[test]
    fn test_gain_to_line_of_credit_keeps_stake() {
        let mut pool = StabilityPool::default();
        let alice = account("alice");
        pool.deposit(alice, whole(100)).unwrap();
        pool.deposit(account("bob"), whole(100)).unwrap();
        offset(&mut pool, whole(20), CollateralAmount::from_whole(2));

        let compounded = pool.compounded_deposit(&alice).unwrap();
        let outcome = pool
            .withdraw_gains(alice, GainDestination::LineOfCredit, no_issuance)
            .unwrap();
        assert_eq!(outcome.collateral_gain, CollateralAmount::from_whole(1));
        assert_eq!(outcome.new_deposit, compounded);
        assert_eq!(pool.deposit_record(&alice).unwrap().initial, compounded);
        assert_eq!(pool.events().filter_by_type("CollateralGainToLineOfCredit").len(), 1);

        // no deposit: nothing to move
        let outcome = pool
            .withdraw_gains(account("carol"), GainDestination::LineOfCredit, no_issuance)
            .unwrap();
        assert!(outcome.collateral_gain.is_zero());
    }

    #[test]
    fn test_conservation_report() {
        let mut pool = StabilityPool::default();
        for (i, amount) in [100u64, 250, 333, 1_000].iter().enumerate() {
            pool.deposit(account(&format!("depositor-{}", i)), whole(*amount)).unwrap();
        }
        offset(&mut pool, whole(777), CollateralAmount::parse("7.77").unwrap());
        offset(&mut pool, whole(123), CollateralAmount::parse("1.5").unwrap());

        let report = pool.check_conservation().unwrap();
        assert_eq!(report.depositors, 4);
        assert!(report.is_balanced(10_000));
    }

    #[test]
    fn test_offset_events() {
        let mut pool = StabilityPool::default();
        pool.deposit(account("alice"), whole(10)).unwrap();
        pool.drain_events();

        offset(&mut pool, whole(10), CollateralAmount::from_whole(1));
        let types: Vec<&str> = pool.events().iter().map(|r| r.event.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "Offset",
                "SumUpdated",
                "ProductUpdated",
                "EpochUpdated",
                "ScaleUpdated",
                "PoolBalanceUpdated",
                "PoolCollateralUpdated",
            ]
        );
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut pool = StabilityPool::default();
        pool.register_front_end(account("frontend"), FixedPoint::from_percentage(75)).unwrap();
        pool.provide(account("alice"), whole(100), Some(account("frontend")), no_issuance)
            .unwrap();
        offset(&mut pool, whole(40), CollateralAmount::from_whole(1));

        let bytes = pool.to_bytes().unwrap();
        let restored = StabilityPool::from_bytes(&bytes).unwrap();
        assert_eq!(restored.state_hash().unwrap(), pool.state_hash().unwrap());
        assert_eq!(
            restored.compounded_deposit(&account("alice")).unwrap(),
            pool.compounded_deposit(&account("alice")).unwrap()
        );
        assert!(restored.events().is_empty());
        assert!(restored.verify_offsets);
    }

    #[test]
    fn test_offset_verification_follows_config() {
        let mut config = PoolConfig::new(account("liquidation-manager"));
        assert!(StabilityPool::from_config(&config).unwrap().verify_offsets);

        config.check_invariants = false;
        let mut pool = StabilityPool::from_config(&config).unwrap();
        assert!(!pool.verify_offsets);

        // rejected offsets leave the ledger untouched either way
        pool.deposit(account("alice"), whole(100)).unwrap();
        let hash = pool.state_hash().unwrap();
        assert!(pool
            .offset(whole(101), CollateralAmount::from_whole(1), no_issuance)
            .is_err());
        assert_eq!(pool.state_hash().unwrap(), hash);
    }
}
