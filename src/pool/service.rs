//! Stability pool service.
//!
//! Wraps the ledger in a lock and wires it to the token, custody, line of
//! credit and issuance collaborators. Every mutating call holds the write
//! lock for its whole duration, so mutations are totally ordered.
//!
//! Order of effects inside one call:
//! 1. preconditions
//! 2. debits (ZUSD pulled from the depositor)
//! 3. ledger commit
//! 4. credits (ZUSD, collateral and ZERO payouts, burns)

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::collaborators::{CollateralDestination, Collaborators};
use crate::core::config::PoolConfig;
use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::{Error, Result};
use crate::events::{EventLog, EventRecord};
use crate::pool::front_end::FrontEnd;
use crate::pool::stability_pool::{
    ConservationReport, DepositorOutcome, GainDestination, OffsetOutcome, PoolStatistics,
    Settlement, StabilityPool,
};
use crate::utils::crypto::{AccountId, Hash};
use crate::utils::math::FixedPoint;
use primitive_types::U256;

/// Thread-safe stability pool with its collaborators
pub struct StabilityPoolService {
    config: PoolConfig,
    pool: RwLock<StabilityPool>,
    collaborators: Collaborators,
    history: RwLock<EventLog>,
}

impl StabilityPoolService {
    /// Create a service around an empty pool
    pub fn new(config: PoolConfig, collaborators: Collaborators) -> Result<Self> {
        let pool = StabilityPool::from_config(&config)?;
        Ok(Self::assemble(config, pool, collaborators))
    }

    /// Create a service around an existing ledger
    pub fn with_pool(
        config: PoolConfig,
        mut pool: StabilityPool,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        pool.apply_config(&config);
        pool.check_invariants()?;
        Ok(Self::assemble(config, pool, collaborators))
    }

    fn assemble(config: PoolConfig, pool: StabilityPool, collaborators: Collaborators) -> Self {
        let history = EventLog::new(config.event_retention);
        Self {
            config,
            pool: RwLock::new(pool),
            collaborators,
            history: RwLock::new(history),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StabilityPool>> {
        self.pool.read().map_err(|_| Error::Lock)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StabilityPool>> {
        self.pool.write().map_err(|_| Error::Lock)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITOR OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit `amount` ZUSD, optionally through a front end
    pub fn deposit(
        &self,
        depositor: AccountId,
        amount: TokenAmount,
        front_end: Option<AccountId>,
    ) -> Result<DepositorOutcome> {
        let mut pool = self.write()?;
        pool.check_provide(&depositor, amount, front_end.as_ref())?;

        self.collaborators.stablecoin.pull_into_pool(&depositor, amount)?;

        let issuance = &self.collaborators.issuance;
        let outcome = match pool.provide(depositor, amount, front_end, || issuance.issue()) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(depositor = %depositor, error = %e, "deposit failed after debit, refunding");
                if let Err(refund) = self.collaborators.stablecoin.pay_from_pool(&depositor, amount) {
                    error!(depositor = %depositor, error = %refund, "refund failed");
                }
                return Err(e);
            }
        };
        self.finish(&mut pool)?;

        self.pay_collateral(CollateralDestination::Account(depositor), outcome.collateral_gain)?;
        self.pay_zero(&outcome)?;

        info!(depositor = %depositor, amount = %amount, new_deposit = %outcome.new_deposit, "deposit");
        Ok(outcome)
    }

    /// Withdraw up to `amount` ZUSD together with all accrued gains
    pub fn withdraw(&self, depositor: AccountId, amount: TokenAmount) -> Result<DepositorOutcome> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let mut pool = self.write()?;
        if pool.has_deposit(&depositor) && self.collaborators.lines.has_undercollateralized_lines() {
            return Err(Error::UndercollateralizedLinesPending);
        }

        let issuance = &self.collaborators.issuance;
        let outcome = pool.withdraw(depositor, amount, || issuance.issue())?;
        self.finish(&mut pool)?;

        if !outcome.withdrawn.is_zero() {
            self.collaborators
                .stablecoin
                .pay_from_pool(&depositor, outcome.withdrawn)
                .map_err(|e| credit_failed("ZUSD withdrawal", &depositor, e))?;
        }
        self.pay_collateral(CollateralDestination::Account(depositor), outcome.collateral_gain)?;
        self.pay_zero(&outcome)?;

        info!(
            depositor = %depositor,
            withdrawn = %outcome.withdrawn,
            new_deposit = %outcome.new_deposit,
            "withdrawal"
        );
        Ok(outcome)
    }

    /// Pay accrued collateral and ZERO gains to the depositor, keeping the stake
    pub fn claim_gains(&self, depositor: AccountId) -> Result<DepositorOutcome> {
        let mut pool = self.write()?;
        let issuance = &self.collaborators.issuance;
        let outcome = pool.withdraw_gains(depositor, GainDestination::Depositor, || issuance.issue())?;
        self.finish(&mut pool)?;

        self.pay_collateral(CollateralDestination::Account(depositor), outcome.collateral_gain)?;
        self.pay_zero(&outcome)?;
        Ok(outcome)
    }

    /// Move the accrued collateral gain into the depositor's line of credit
    pub fn withdraw_gain_to_line_of_credit(&self, depositor: AccountId) -> Result<DepositorOutcome> {
        let mut pool = self.write()?;
        if !pool.has_deposit(&depositor) {
            return Ok(DepositorOutcome::empty(depositor));
        }
        if !self.collaborators.lines.has_active_line(&depositor) {
            return Err(Error::NoActiveLineOfCredit(depositor.to_hex()));
        }

        let issuance = &self.collaborators.issuance;
        let outcome =
            pool.withdraw_gains(depositor, GainDestination::LineOfCredit, || issuance.issue())?;
        self.finish(&mut pool)?;

        if !outcome.collateral_gain.is_zero() {
            self.pay_collateral(
                CollateralDestination::LineOfCredit(depositor),
                outcome.collateral_gain,
            )?;
            self.collaborators
                .lines
                .top_up_collateral(&depositor, outcome.collateral_gain)
                .map_err(|e| credit_failed("line of credit top-up", &depositor, e))?;
        }
        self.pay_zero(&outcome)?;

        info!(depositor = %depositor, gain = %outcome.collateral_gain, "gain moved to line of credit");
        Ok(outcome)
    }

    /// Register a front end
    pub fn register_front_end(&self, account: AccountId, kickback_rate: FixedPoint) -> Result<()> {
        let mut pool = self.write()?;
        pool.register_front_end(account, kickback_rate)?;
        self.finish(&mut pool)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cancel `debt` against the pool and hand `collateral` to the depositors.
    ///
    /// Only the configured liquidation manager may call this.
    pub fn offset(
        &self,
        caller: &AccountId,
        debt: TokenAmount,
        collateral: CollateralAmount,
    ) -> Result<OffsetOutcome> {
        if *caller != self.config.liquidation_manager {
            return Err(Error::Unauthorized(format!(
                "{} is not the liquidation manager",
                caller
            )));
        }

        let mut pool = self.write()?;
        let issuance = &self.collaborators.issuance;
        let outcome = pool.offset(debt, collateral, || issuance.issue())?;
        self.finish(&mut pool)?;

        if outcome.applied {
            self.collaborators.stablecoin.burn_from_pool(debt).map_err(|e| {
                error!(debt = %debt, error = %e, "burn after offset failed");
                e
            })?;
            self.collaborators
                .custody
                .receive_liquidated(collateral)
                .map_err(|e| {
                    error!(collateral = %collateral, error = %e, "collateral transfer after offset failed");
                    e
                })?;
        }
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Drain ledger events into the history.
    ///
    /// Invariants are checked by the ledger before it commits an offset, so
    /// nothing here can fail after the ledger has changed except the lock.
    fn finish(&self, pool: &mut StabilityPool) -> Result<()> {
        let records = pool.drain_events();
        let mut history = self.history.write().map_err(|_| Error::Lock)?;
        for record in records {
            debug!(
                sequence = record.sequence,
                event = record.event.event_type(),
                account = ?record.event.account(),
                "pool event"
            );
            history.append(record);
        }
        Ok(())
    }

    fn pay_collateral(&self, destination: CollateralDestination, amount: CollateralAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.collaborators
            .custody
            .pay_out(&destination, amount)
            .map_err(|e| {
                error!(destination = %destination, amount = %amount, error = %e, "collateral payout failed");
                e
            })
    }

    fn pay_zero(&self, outcome: &DepositorOutcome) -> Result<()> {
        if !outcome.zero_gain.is_zero() {
            self.collaborators
                .issuance
                .send(&outcome.depositor, outcome.zero_gain)
                .map_err(|e| credit_failed("ZERO payout", &outcome.depositor, e))?;
        }
        if let Some(front_end) = &outcome.front_end {
            if !outcome.front_end_zero_gain.is_zero() {
                self.collaborators
                    .issuance
                    .send(front_end, outcome.front_end_zero_gain)
                    .map_err(|e| credit_failed("front end ZERO payout", front_end, e))?;
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Value a depositor's position
    pub fn settle(&self, depositor: &AccountId) -> Result<Settlement> {
        self.read()?.settle(depositor)
    }

    /// Current value of a deposit
    pub fn compounded_deposit(&self, depositor: &AccountId) -> Result<TokenAmount> {
        self.read()?.compounded_deposit(depositor)
    }

    /// Collateral a depositor would receive now
    pub fn depositor_collateral_gain(&self, depositor: &AccountId) -> Result<CollateralAmount> {
        self.read()?.depositor_collateral_gain(depositor)
    }

    /// ZERO a depositor would receive now
    pub fn depositor_zero_gain(&self, depositor: &AccountId) -> Result<ZeroTokenAmount> {
        self.read()?.depositor_zero_gain(depositor)
    }

    /// Registered front end
    pub fn front_end(&self, account: &AccountId) -> Result<Option<FrontEnd>> {
        Ok(self.read()?.front_end(account).cloned())
    }

    /// Current value of a front end's stake
    pub fn compounded_front_end_stake(&self, front_end: &AccountId) -> Result<TokenAmount> {
        self.read()?.compounded_front_end_stake(front_end)
    }

    /// ZERO a front end would receive now
    pub fn front_end_zero_gain(&self, front_end: &AccountId) -> Result<ZeroTokenAmount> {
        self.read()?.front_end_zero_gain(front_end)
    }

    /// Total ZUSD pooled
    pub fn total_pooled(&self) -> Result<TokenAmount> {
        Ok(self.read()?.total_pooled())
    }

    /// Current epoch
    pub fn current_epoch(&self) -> Result<u64> {
        Ok(self.read()?.current_epoch())
    }

    /// Current scale
    pub fn current_scale(&self) -> Result<u64> {
        Ok(self.read()?.current_scale())
    }

    /// Running product
    pub fn p(&self) -> Result<FixedPoint> {
        Ok(self.read()?.p())
    }

    /// `S[epoch][scale]`
    pub fn sum_at(&self, epoch: u64, scale: u64) -> Result<U256> {
        Ok(self.read()?.sum_at(epoch, scale))
    }

    /// `G[epoch][scale]`
    pub fn zero_sum_at(&self, epoch: u64, scale: u64) -> Result<U256> {
        Ok(self.read()?.zero_sum_at(epoch, scale))
    }

    /// Pool statistics
    pub fn stats(&self) -> Result<PoolStatistics> {
        Ok(self.read()?.statistics())
    }

    /// Compare pooled totals with the sum over depositors
    pub fn check_conservation(&self) -> Result<ConservationReport> {
        self.read()?.check_conservation()
    }

    /// Accounts with a live deposit
    pub fn depositors(&self) -> Result<Vec<AccountId>> {
        Ok(self.read()?.depositors().copied().collect())
    }

    /// Copy of the ledger, for persistence
    pub fn snapshot(&self) -> Result<StabilityPool> {
        Ok(self.read()?.clone())
    }

    /// Hash of the ledger state
    pub fn state_hash(&self) -> Result<Hash> {
        self.read()?.state_hash()
    }

    /// Events recorded so far, oldest first
    pub fn history(&self) -> Result<Vec<EventRecord>> {
        let history = self.history.read().map_err(|_| Error::Lock)?;
        Ok(history.iter().cloned().collect())
    }
}

fn credit_failed(leg: &str, account: &AccountId, e: Error) -> Error {
    error!(leg = leg, account = %account, error = %e, "credit leg failed after commit");
    e
}
