//! Depositor records and their point-in-time valuation.

use serde::{Deserialize, Serialize};

use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::Result;
use crate::pool::accounting::{GlobalState, SumView};
use crate::pool::snapshot::Snapshot;
use crate::utils::crypto::AccountId;
use crate::utils::math::{FixedPoint, Rounding};

/// A depositor's stake as of its last settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    /// Deposit value at the time of the snapshot
    pub initial: TokenAmount,
    /// Front end the deposit was made through, fixed while the deposit lives
    pub front_end: Option<AccountId>,
    /// Accumulators at the time of the last settlement
    pub snapshot: Snapshot,
}

impl DepositRecord {
    /// Create a record
    pub fn new(initial: TokenAmount, front_end: Option<AccountId>, snapshot: Snapshot) -> Self {
        Self {
            initial,
            front_end,
            snapshot,
        }
    }

    /// Deposit value after every offset since the snapshot
    pub fn compounded(&self, state: &GlobalState, dust_divisor: u128) -> Result<TokenAmount> {
        state
            .compounded_stake(
                self.initial.raw(),
                self.snapshot.p,
                self.snapshot.epoch,
                self.snapshot.scale,
                dust_divisor,
            )
            .map(TokenAmount::from_raw)
    }

    /// Collateral earned since the snapshot
    pub fn collateral_gain(&self, state: &GlobalState) -> Result<CollateralAmount> {
        GlobalState::gain_from_sums(
            &state.collateral_sums(),
            self.initial.raw(),
            self.snapshot.p,
            self.snapshot.s,
            self.snapshot.epoch,
            self.snapshot.scale,
        )
        .map(CollateralAmount::from_raw)
    }

    /// ZERO earned since the snapshot, after the front end's cut.
    ///
    /// `kickback_rate` is the share the front end passes on to its
    /// depositors, `ONE` for untagged deposits.
    pub fn zero_gain(
        &self,
        zero_sums: &SumView<'_>,
        kickback_rate: FixedPoint,
    ) -> Result<ZeroTokenAmount> {
        let gross = GlobalState::gain_from_sums(
            zero_sums,
            self.initial.raw(),
            self.snapshot.p,
            self.snapshot.g,
            self.snapshot.epoch,
            self.snapshot.scale,
        )?;
        kickback_rate
            .mul_amount(gross, Rounding::Down)
            .map(ZeroTokenAmount::from_raw)
    }
}
