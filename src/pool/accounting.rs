//! Global accumulators of the stability pool.
//!
//! The pool never iterates its depositors. Instead it keeps:
//!
//! - `P`: the running product of `(1 - lossPerUnit)` over all offsets. A
//!   deposit made when the product was `P_snap` is worth
//!   `initial * P / P_snap` now.
//! - `S[epoch][scale]`: collateral gained per unit staked, each increment
//!   multiplied by the `P` current at the time.
//! - `G[epoch][scale]`: the same for ZERO issuance.
//! - `epoch`: advanced when an offset cancels the whole pool, resetting `P`.
//! - `scale`: advanced when `P` would drop below `SCALE_FACTOR`, at which
//!   point `P` is multiplied by `SCALE_FACTOR` to keep its precision.
//!
//! Every division carries its remainder into the next update. State changes
//! are split into a `plan_*` step that computes all new values against an
//! immutable borrow and an `apply_*` step that cannot fail.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::math::*;

// ═══════════════════════════════════════════════════════════════════════════════
// SUM TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Sparse `epoch -> scale -> sum` table. Missing buckets read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumTable {
    buckets: BTreeMap<u64, BTreeMap<u64, U256>>,
}

impl SumTable {
    /// Read a bucket
    pub fn get(&self, epoch: u64, scale: u64) -> U256 {
        self.buckets
            .get(&epoch)
            .and_then(|scales| scales.get(&scale))
            .copied()
            .unwrap_or_default()
    }

    /// Overwrite a bucket
    pub fn set(&mut self, epoch: u64, scale: u64, value: U256) {
        self.buckets.entry(epoch).or_default().insert(scale, value);
    }

    /// Number of non-empty buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    /// Check if no bucket was ever written
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Read access to a sum table with at most one pending, uncommitted bucket
#[derive(Debug, Clone, Copy)]
pub struct SumView<'a> {
    table: &'a SumTable,
    pending: Option<(u64, u64, U256)>,
}

impl<'a> SumView<'a> {
    /// View of the committed table
    pub fn new(table: &'a SumTable) -> Self {
        Self { table, pending: None }
    }

    /// View of the table as it will be once `plan` is applied
    pub fn with_issuance(table: &'a SumTable, plan: Option<&IssuancePlan>) -> Self {
        Self {
            table,
            pending: plan.map(|p| (p.epoch, p.scale, p.new_sum)),
        }
    }

    /// Read a bucket
    pub fn get(&self, epoch: u64, scale: u64) -> U256 {
        match self.pending {
            Some((e, s, sum)) if e == epoch && s == scale => sum,
            _ => self.table.get(epoch, scale),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLANS
// ═══════════════════════════════════════════════════════════════════════════════

/// ZERO issuance folded into `G`, computed but not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuancePlan {
    /// Amount issued
    pub issued: ZeroTokenAmount,
    /// ZERO per unit staked (18 decimals)
    pub zero_per_unit: U256,
    /// Epoch of the bucket being updated
    pub epoch: u64,
    /// Scale of the bucket being updated
    pub scale: u64,
    /// New value of `G[epoch][scale]`
    pub new_sum: U256,
    /// Remainder carried into the next issuance
    pub new_error: u128,
}

/// Every value an offset changes, computed but not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetPlan {
    /// Debt cancelled
    pub debt: TokenAmount,
    /// Collateral distributed
    pub collateral: CollateralAmount,
    /// Collateral per unit staked (18 decimals)
    pub gain_per_unit: U256,
    /// Collateral remainder carried forward
    pub new_collateral_error: u128,
    /// Fraction of each deposit cancelled
    pub loss_per_unit: FixedPoint,
    /// Loss over-charge carried forward
    pub new_loss_error: u128,
    /// Epoch of the `S` bucket receiving the gain
    pub sum_epoch: u64,
    /// Scale of the `S` bucket receiving the gain
    pub sum_scale: u64,
    /// New value of that `S` bucket
    pub new_sum: U256,
    /// New running product
    pub new_p: FixedPoint,
    /// Epoch after the offset
    pub new_epoch: u64,
    /// Scale after the offset
    pub new_scale: u64,
    /// Number of scale increments applied
    pub scale_crossings: u32,
    /// Pooled total after the offset
    pub new_total_pooled: TokenAmount,
    /// Pool collateral after the offset
    pub new_total_collateral: CollateralAmount,
}

impl OffsetPlan {
    /// True when the offset cancelled the whole pool
    pub fn advances_epoch(&self) -> bool {
        self.new_epoch != self.sum_epoch
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Singleton accumulator state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    p: FixedPoint,
    epoch: u64,
    scale: u64,
    collateral_sums: SumTable,
    zero_sums: SumTable,
    last_collateral_error: u128,
    last_loss_error: u128,
    last_zero_error: u128,
    total_pooled: TokenAmount,
    total_collateral: CollateralAmount,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalState {
    /// Fresh state: `P = 1`, epoch and scale zero, empty pool
    pub fn new() -> Self {
        Self {
            p: FixedPoint::ONE,
            epoch: 0,
            scale: 0,
            collateral_sums: SumTable::default(),
            zero_sums: SumTable::default(),
            last_collateral_error: 0,
            last_loss_error: 0,
            last_zero_error: 0,
            total_pooled: TokenAmount::ZERO,
            total_collateral: CollateralAmount::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Running product
    pub fn p(&self) -> FixedPoint {
        self.p
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current scale
    pub fn scale(&self) -> u64 {
        self.scale
    }

    /// Total ZUSD pooled
    pub fn total_pooled(&self) -> TokenAmount {
        self.total_pooled
    }

    /// Collateral held for depositors
    pub fn total_collateral(&self) -> CollateralAmount {
        self.total_collateral
    }

    /// `S[epoch][scale]`
    pub fn collateral_sum(&self, epoch: u64, scale: u64) -> U256 {
        self.collateral_sums.get(epoch, scale)
    }

    /// `G[epoch][scale]`
    pub fn zero_sum(&self, epoch: u64, scale: u64) -> U256 {
        self.zero_sums.get(epoch, scale)
    }

    /// Collateral sums
    pub fn collateral_sums(&self) -> SumView<'_> {
        SumView::new(&self.collateral_sums)
    }

    /// ZERO sums, including an issuance not yet applied
    pub fn zero_sums(&self, pending: Option<&IssuancePlan>) -> SumView<'_> {
        SumView::with_issuance(&self.zero_sums, pending)
    }

    /// Carried remainders `(collateral, loss, zero)`
    pub fn carried_errors(&self) -> (u128, u128, u128) {
        (self.last_collateral_error, self.last_loss_error, self.last_zero_error)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POOLED TOTALS
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn set_total_pooled(&mut self, total: TokenAmount) {
        self.total_pooled = total;
    }

    pub(crate) fn set_total_collateral(&mut self, total: CollateralAmount) {
        self.total_collateral = total;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ZERO ISSUANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fold freshly issued ZERO into `G[epoch][scale]`.
    ///
    /// Returns `None` when nothing is issued or the pool is empty; in the
    /// latter case the issuance is not distributed.
    pub fn plan_issuance(&self, issued: ZeroTokenAmount) -> Result<Option<IssuancePlan>> {
        let total = self.total_pooled.raw();
        if total == 0 || issued.is_zero() {
            return Ok(None);
        }

        let numerator = add_u256(
            mul_u256(issued.to_u256(), U256::from(DECIMAL_PRECISION), "zero numerator")?,
            U256::from(self.last_zero_error),
            "zero numerator",
        )?;
        let (zero_per_unit, remainder) = div_rem(numerator, U256::from(total))?;

        let marginal = mul_u256(zero_per_unit, U256::from(self.p.raw()), "zero marginal")?;
        let new_sum = add_u256(self.zero_sum(self.epoch, self.scale), marginal, "G update")?;

        Ok(Some(IssuancePlan {
            issued,
            zero_per_unit,
            epoch: self.epoch,
            scale: self.scale,
            new_sum,
            new_error: to_u128(remainder, "zero error")?,
        }))
    }

    /// Commit a planned issuance
    pub fn apply_issuance(&mut self, plan: &IssuancePlan) {
        self.zero_sums.set(plan.epoch, plan.scale, plan.new_sum);
        self.last_zero_error = plan.new_error;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OFFSET
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compute the effect of cancelling `debt` against the pool and
    /// distributing `collateral` to its depositors.
    ///
    /// The caller guarantees `0 < debt <= total_pooled`.
    pub fn plan_offset(
        &self,
        debt: TokenAmount,
        collateral: CollateralAmount,
        max_scale_crossings: u32,
    ) -> Result<OffsetPlan> {
        let total_raw = self.total_pooled.raw();
        if total_raw == 0 || debt.is_zero() || debt > self.total_pooled {
            return Err(Error::Internal(format!(
                "offset of {} planned against pool of {}",
                debt, self.total_pooled
            )));
        }
        let total = U256::from(total_raw);
        let precision = U256::from(DECIMAL_PRECISION);

        // Collateral per unit staked, remainder carried
        let collateral_numerator = add_u256(
            mul_u256(collateral.to_u256(), precision, "collateral numerator")?,
            U256::from(self.last_collateral_error),
            "collateral numerator",
        )?;
        let (gain_per_unit, collateral_remainder) = div_rem(collateral_numerator, total)?;

        // Loss per unit staked, rounded up so depositors never keep more than
        // the pool holds
        let (loss_per_unit, new_loss_error) = if debt == self.total_pooled {
            (DECIMAL_PRECISION, 0)
        } else {
            let numerator = mul_u256(debt.to_u256(), precision, "loss numerator")?;
            let carried = U256::from(self.last_loss_error);
            if carried >= numerator {
                // earlier over-charges already cover this debt
                (0, to_u128(carried - numerator, "loss error")?)
            } else {
                let loss_numerator = numerator - carried;
                let loss = add_u256(loss_numerator / total, U256::one(), "loss per unit")?;
                let error =
                    sub_u256(mul_u256(loss, total, "loss error")?, loss_numerator, "loss error")?;
                (to_u128(loss, "loss per unit")?, to_u128(error, "loss error")?)
            }
        };
        if loss_per_unit > DECIMAL_PRECISION {
            return Err(Error::InvariantViolation(format!(
                "loss per unit {} exceeds 1",
                loss_per_unit
            )));
        }

        // S is updated with the product as it was before this offset
        let marginal_gain = mul_u256(gain_per_unit, U256::from(self.p.raw()), "S marginal")?;
        let new_sum = add_u256(
            self.collateral_sum(self.epoch, self.scale),
            marginal_gain,
            "S update",
        )?;

        let factor = DECIMAL_PRECISION - loss_per_unit;
        let (new_p, new_epoch, new_scale, scale_crossings) = if factor == 0 {
            let epoch = self.epoch.checked_add(1).ok_or_else(|| Error::Overflow {
                operation: "epoch increment".into(),
            })?;
            (DECIMAL_PRECISION, epoch, 0, 0)
        } else {
            let product = mul_u256(U256::from(self.p.raw()), U256::from(factor), "P update")?;
            let mut candidate = product / precision;
            let mut crossings = 0u32;
            let mut multiplier = U256::one();
            while candidate < U256::from(SCALE_FACTOR) && crossings < max_scale_crossings {
                multiplier = mul_u256(multiplier, U256::from(SCALE_FACTOR), "scale multiplier")?;
                candidate = mul_u256(product, multiplier, "P rescale")? / precision;
                crossings += 1;
            }
            if candidate.is_zero() {
                return Err(Error::InvariantViolation(format!(
                    "P would reach zero after {} scale crossings",
                    crossings
                )));
            }
            let scale = self
                .scale
                .checked_add(u64::from(crossings))
                .ok_or_else(|| Error::Overflow {
                    operation: "scale increment".into(),
                })?;
            (to_u128(candidate, "P update")?, self.epoch, scale, crossings)
        };

        let new_total_pooled = self.total_pooled.checked_sub(debt).ok_or_else(|| {
            Error::Underflow {
                operation: "total pooled - debt".into(),
            }
        })?;
        let new_total_collateral = self
            .total_collateral
            .checked_add(collateral)
            .ok_or_else(|| Error::Overflow {
                operation: "total collateral + gain".into(),
            })?;

        Ok(OffsetPlan {
            debt,
            collateral,
            gain_per_unit,
            new_collateral_error: to_u128(collateral_remainder, "collateral error")?,
            loss_per_unit: FixedPoint::from_raw(loss_per_unit),
            new_loss_error,
            sum_epoch: self.epoch,
            sum_scale: self.scale,
            new_sum,
            new_p: FixedPoint::from_raw(new_p),
            new_epoch,
            new_scale,
            scale_crossings,
            new_total_pooled,
            new_total_collateral,
        })
    }

    /// Commit a planned offset
    pub fn apply_offset(&mut self, plan: &OffsetPlan) {
        self.last_collateral_error = plan.new_collateral_error;
        self.last_loss_error = plan.new_loss_error;
        self.collateral_sums
            .set(plan.sum_epoch, plan.sum_scale, plan.new_sum);
        self.p = plan.new_p;
        self.epoch = plan.new_epoch;
        self.scale = plan.new_scale;
        self.total_pooled = plan.new_total_pooled;
        self.total_collateral = plan.new_total_collateral;
    }

    /// Apply `plan` to a copy and check its invariants, leaving `self` as is
    pub fn preview_offset(&self, plan: &OffsetPlan) -> Result<GlobalState> {
        let mut next = self.clone();
        next.apply_offset(plan);
        next.check_invariants()?;
        Ok(next)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STAKE MATH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Value now of a stake of `initial` recorded at `(p_snap, epoch, scale)`.
    ///
    /// Zero when an epoch has passed, when two or more scale changes have
    /// passed, or when the result is below `initial / dust_divisor`.
    pub fn compounded_stake(
        &self,
        initial: u128,
        p_snap: FixedPoint,
        epoch_snap: u64,
        scale_snap: u64,
        dust_divisor: u128,
    ) -> Result<u128> {
        if initial == 0 || epoch_snap < self.epoch {
            return Ok(0);
        }
        if epoch_snap > self.epoch || (epoch_snap == self.epoch && scale_snap > self.scale) {
            return Err(Error::InvariantViolation(format!(
                "snapshot at epoch {} scale {} is ahead of pool at epoch {} scale {}",
                epoch_snap, scale_snap, self.epoch, self.scale
            )));
        }
        if p_snap.is_zero() {
            return Err(Error::InvariantViolation("snapshot P is zero".into()));
        }

        let base = mul_div(
            U256::from(initial),
            U256::from(self.p.raw()),
            U256::from(p_snap.raw()),
            Rounding::Down,
        )?;
        let compounded = match self.scale - scale_snap {
            0 => base,
            1 => base / U256::from(SCALE_FACTOR),
            _ => U256::zero(),
        };
        let compounded = to_u128(compounded, "compounded stake")?.min(initial);

        if dust_divisor > 0 && compounded < initial / dust_divisor {
            return Ok(0);
        }
        Ok(compounded)
    }

    /// Gain accrued by a stake of `initial` since its snapshot, read from the
    /// snapshot's epoch and the two scale buckets starting at its scale
    pub fn gain_from_sums(
        sums: &SumView<'_>,
        initial: u128,
        p_snap: FixedPoint,
        sum_snap: U256,
        epoch_snap: u64,
        scale_snap: u64,
    ) -> Result<u128> {
        if initial == 0 {
            return Ok(0);
        }
        if p_snap.is_zero() {
            return Err(Error::InvariantViolation("snapshot P is zero".into()));
        }

        let first = sums.get(epoch_snap, scale_snap).saturating_sub(sum_snap);
        let second = match scale_snap.checked_add(1) {
            Some(next) => sums.get(epoch_snap, next) / U256::from(SCALE_FACTOR),
            None => U256::zero(),
        };
        let portion = add_u256(first, second, "gain portions")?;

        let gain = mul_div(
            U256::from(initial),
            portion,
            U256::from(p_snap.raw()),
            Rounding::Down,
        )? / U256::from(DECIMAL_PRECISION);
        to_u128(gain, "gain")
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INVARIANTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// O(1) checks on the accumulators
    pub fn check_invariants(&self) -> Result<()> {
        if self.p.is_zero() || self.p > FixedPoint::ONE {
            return Err(Error::InvariantViolation(format!(
                "P = {} outside (0, 1]",
                self.p.raw()
            )));
        }
        if self.epoch_sum_behind() {
            return Err(Error::InvariantViolation(
                "sum table holds a bucket beyond the current epoch".into(),
            ));
        }
        Ok(())
    }

    fn epoch_sum_behind(&self) -> bool {
        let beyond = |table: &SumTable| {
            table
                .buckets
                .keys()
                .next_back()
                .map_or(false, |&e| e > self.epoch)
        };
        beyond(&self.collateral_sums) || beyond(&self.zero_sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(total: u128) -> GlobalState {
        let mut state = GlobalState::new();
        state.set_total_pooled(TokenAmount::from_raw(total));
        state
    }

    fn offset(state: &mut GlobalState, debt: u128, collateral: u128) -> OffsetPlan {
        let plan = state
            .plan_offset(
                TokenAmount::from_raw(debt),
                CollateralAmount::from_raw(collateral),
                DEFAULT_MAX_SCALE_CROSSINGS,
            )
            .unwrap();
        state.apply_offset(&plan);
        plan
    }

    #[test]
    fn test_sum_table_sparse() {
        let mut table = SumTable::default();
        assert!(table.is_empty());
        assert_eq!(table.get(3, 7), U256::zero());

        table.set(0, 0, U256::from(5u8));
        table.set(2, 1, U256::from(9u8));
        assert_eq!(table.get(0, 0), U256::from(5u8));
        assert_eq!(table.get(2, 1), U256::from(9u8));
        assert_eq!(table.get(1, 0), U256::zero());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_sum_view_pending() {
        let mut table = SumTable::default();
        table.set(0, 0, U256::from(1u8));
        let plan = IssuancePlan {
            issued: ZeroTokenAmount::from_raw(1),
            zero_per_unit: U256::one(),
            epoch: 0,
            scale: 0,
            new_sum: U256::from(4u8),
            new_error: 0,
        };
        let view = SumView::with_issuance(&table, Some(&plan));
        assert_eq!(view.get(0, 0), U256::from(4u8));
        assert_eq!(SumView::new(&table).get(0, 0), U256::one());
    }

    #[test]
    fn test_partial_offset_updates_p_and_s() {
        let total = 30_000 * DECIMAL_PRECISION;
        let mut state = pool_with(total);
        let plan = offset(&mut state, 10_000 * DECIMAL_PRECISION, 99_500_000_000_000_000_000);

        assert_eq!(plan.loss_per_unit.raw(), 333_333_333_333_333_334);
        assert_eq!(state.p().raw(), 666_666_666_666_666_666);
        assert_eq!(state.epoch(), 0);
        assert_eq!(state.scale(), 0);
        assert_eq!(state.total_pooled().raw(), 20_000 * DECIMAL_PRECISION);
        assert_eq!(
            state.collateral_sum(0, 0),
            U256::from(3_316_666_666_666_666u128) * U256::from(DECIMAL_PRECISION)
        );
        // loss error is the over-charge of the rounded-up loss
        let (_, loss_error, _) = state.carried_errors();
        assert_eq!(loss_error, 2 * 10_000 * DECIMAL_PRECISION);
    }

    #[test]
    fn test_full_offset_advances_epoch() {
        let mut state = pool_with(1_000 * DECIMAL_PRECISION);
        let plan = offset(&mut state, 1_000 * DECIMAL_PRECISION, DECIMAL_PRECISION);

        assert!(plan.advances_epoch());
        assert_eq!(state.epoch(), 1);
        assert_eq!(state.scale(), 0);
        assert_eq!(state.p(), FixedPoint::ONE);
        assert!(state.total_pooled().is_zero());
        assert_eq!(state.carried_errors().1, 0);
        // the gain lands in the bucket of the epoch that was wiped
        assert!(!state.collateral_sum(0, 0).is_zero());
        assert!(state.collateral_sum(1, 0).is_zero());
    }

    #[test]
    fn test_single_scale_crossing() {
        let mut state = pool_with(10_000 * DECIMAL_PRECISION);
        // leaves P = 5e9, just above the scale floor
        offset(&mut state, 10_000 * DECIMAL_PRECISION - 50_000_000_000_001, 0);
        assert_eq!(state.p().raw(), 5_000_000_000);
        assert_eq!(state.scale(), 0);

        let total = state.total_pooled().raw();
        let plan = offset(&mut state, total * 9 / 10, 0);
        assert_eq!(plan.scale_crossings, 1);
        assert_eq!(state.scale(), 1);
        assert!(state.p().raw() >= SCALE_FACTOR);
        assert!(state.p() <= FixedPoint::ONE);
    }

    #[test]
    fn test_double_scale_crossing() {
        let mut state = pool_with(10_000 * DECIMAL_PRECISION);
        offset(&mut state, 10_000 * DECIMAL_PRECISION - 50_000_000_000_001, 0);

        let total = state.total_pooled().raw();
        let plan = offset(&mut state, total - 5_000, 0);
        assert_eq!(plan.scale_crossings, 2);
        assert_eq!(state.scale(), 2);
        assert_eq!(state.epoch(), 0);
        assert!(!state.p().is_zero());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_crossing_bound_limits_rescale() {
        let mut state = pool_with(10_000 * DECIMAL_PRECISION);
        offset(&mut state, 10_000 * DECIMAL_PRECISION - 50_000_000_000_001, 0);

        let before = state.clone();
        let total = state.total_pooled().raw();
        let plan = state
            .plan_offset(TokenAmount::from_raw(total - 5_000), CollateralAmount::ZERO, 1)
            .unwrap();
        assert_eq!(plan.scale_crossings, 1);
        assert!(plan.new_p.raw() < SCALE_FACTOR);
        assert!(!plan.new_p.is_zero());
        // planning never mutates
        assert_eq!(state, before);
    }

    #[test]
    fn test_zero_p_is_rejected() {
        let mut state = pool_with(10_000 * DECIMAL_PRECISION);
        state.p = FixedPoint::from_raw(1);

        let before = state.clone();
        let result = state.plan_offset(
            TokenAmount::from_raw(10_000 * DECIMAL_PRECISION - 1_000_000_000_000),
            CollateralAmount::ZERO,
            1,
        );
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(state, before);
    }

    #[test]
    fn test_issuance_plan() {
        let state = pool_with(3 * DECIMAL_PRECISION);
        assert!(state.plan_issuance(ZeroTokenAmount::ZERO).unwrap().is_none());
        assert!(GlobalState::new()
            .plan_issuance(ZeroTokenAmount::from_whole(1))
            .unwrap()
            .is_none());

        let plan = state
            .plan_issuance(ZeroTokenAmount::from_raw(10))
            .unwrap()
            .unwrap();
        // 10e18 / 3e18 = 3 remainder 1e18
        assert_eq!(plan.zero_per_unit, U256::from(3u8));
        assert_eq!(plan.new_error, DECIMAL_PRECISION);
        assert_eq!(plan.new_sum, U256::from(3u8) * U256::from(DECIMAL_PRECISION));
    }

    #[test]
    fn test_compounded_stake_rules() {
        let mut state = pool_with(1_000 * DECIMAL_PRECISION);
        let initial = 1_000 * DECIMAL_PRECISION;
        offset(&mut state, 250 * DECIMAL_PRECISION, 0);

        let compounded = state
            .compounded_stake(initial, FixedPoint::ONE, 0, 0, DUST_DIVISOR)
            .unwrap();
        assert_eq!(compounded, 750 * DECIMAL_PRECISION - 1_000);
        assert!(compounded <= initial);

        // older epoch
        let mut wiped = pool_with(DECIMAL_PRECISION);
        offset(&mut wiped, DECIMAL_PRECISION, 0);
        assert_eq!(
            wiped
                .compounded_stake(initial, FixedPoint::ONE, 0, 0, DUST_DIVISOR)
                .unwrap(),
            0
        );

        // snapshot ahead of the pool is corrupt state
        assert!(state
            .compounded_stake(initial, FixedPoint::ONE, 0, 3, DUST_DIVISOR)
            .is_err());
    }

    #[test]
    fn test_carried_loss_covers_tiny_offset() {
        let total = 3_000_000 * DECIMAL_PRECISION;
        let mut state = pool_with(total);
        offset(&mut state, total / 3, 0);
        let (_, carried, _) = state.carried_errors();
        assert_eq!(carried, 2_000_000 * DECIMAL_PRECISION);
        let p = state.p();

        // one wei of debt is paid out of the earlier over-charge
        let plan = offset(&mut state, 1, 0);
        assert!(plan.loss_per_unit.is_zero());
        assert_eq!(state.p(), p);
        assert_eq!(state.carried_errors().1, carried - DECIMAL_PRECISION);
        assert_eq!(state.total_pooled().raw(), total - total / 3 - 1);

        // a real offset afterwards still charges a loss
        let plan = offset(&mut state, total / 3, 0);
        assert!(!plan.loss_per_unit.is_zero());
        assert!(plan.loss_per_unit.raw() <= DECIMAL_PRECISION / 2 + 1);
    }

    #[test]
    fn test_preview_rejects_invalid_state() {
        let mut state = pool_with(10 * DECIMAL_PRECISION);
        let before = state.clone();
        let mut plan = state
            .plan_offset(
                TokenAmount::from_whole(4),
                CollateralAmount::ZERO,
                DEFAULT_MAX_SCALE_CROSSINGS,
            )
            .unwrap();

        let next = state.preview_offset(&plan).unwrap();
        assert_eq!(next.p(), plan.new_p);
        assert_eq!(state, before);

        plan.new_p = FixedPoint::ZERO;
        assert!(matches!(
            state.preview_offset(&plan),
            Err(Error::InvariantViolation(_))
        ));
        assert_eq!(state, before);
        state.apply_offset(&plan);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_gain_from_sums() {
        let mut state = pool_with(30_000 * DECIMAL_PRECISION);
        offset(&mut state, 10_000 * DECIMAL_PRECISION, 99_500_000_000_000_000_000);

        let gain = GlobalState::gain_from_sums(
            &state.collateral_sums(),
            10_000 * DECIMAL_PRECISION,
            FixedPoint::ONE,
            U256::zero(),
            0,
            0,
        )
        .unwrap();
        assert!(abs_diff(gain, 33_166_666_666_666_666_667) < 10_000);
    }
}
