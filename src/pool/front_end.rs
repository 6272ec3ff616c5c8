//! Front ends.
//!
//! A front end is an account that routes deposits into the pool and keeps a
//! share `1 - kickback_rate` of the ZERO rewards those deposits earn. Its
//! stake is the sum of the deposits tagged with it and compounds with the
//! same product as the deposits themselves.

use serde::{Deserialize, Serialize};

use crate::core::token::{TokenAmount, ZeroTokenAmount};
use crate::error::Result;
use crate::pool::accounting::{GlobalState, SumView};
use crate::pool::snapshot::FrontEndSnapshot;
use crate::utils::math::{FixedPoint, Rounding};

/// A registered front end and its aggregated stake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEnd {
    /// Share of ZERO rewards passed to depositors, in [0, 1]
    pub kickback_rate: FixedPoint,
    /// Stake at the time of the snapshot
    pub stake: TokenAmount,
    /// Accumulators at the time of the last stake change
    pub snapshot: FrontEndSnapshot,
}

impl FrontEnd {
    /// Register with no stake
    pub fn new(kickback_rate: FixedPoint) -> Self {
        Self {
            kickback_rate,
            stake: TokenAmount::ZERO,
            snapshot: FrontEndSnapshot::default(),
        }
    }

    /// Stake value after every offset since the snapshot
    pub fn compounded_stake(&self, state: &GlobalState, dust_divisor: u128) -> Result<TokenAmount> {
        state
            .compounded_stake(
                self.stake.raw(),
                self.snapshot.p,
                self.snapshot.epoch,
                self.snapshot.scale,
                dust_divisor,
            )
            .map(TokenAmount::from_raw)
    }

    /// The front end's own cut of the ZERO its stake earned
    pub fn zero_gain(&self, zero_sums: &SumView<'_>) -> Result<ZeroTokenAmount> {
        let gross = GlobalState::gain_from_sums(
            zero_sums,
            self.stake.raw(),
            self.snapshot.p,
            self.snapshot.g,
            self.snapshot.epoch,
            self.snapshot.scale,
        )?;
        self.kickback_rate
            .complement()?
            .mul_amount(gross, Rounding::Down)
            .map(ZeroTokenAmount::from_raw)
    }
}
