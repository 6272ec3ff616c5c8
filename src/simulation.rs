//! Randomized pool simulation.
//!
//! Drives the service with in-memory collaborators through a seeded sequence
//! of deposits, withdrawals and offsets, including pool-emptying offsets and
//! deep offsets that push `P` across scale boundaries. At the end every
//! depositor withdraws everything and the report states whether all of them
//! could.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::CollateralCustody;
use crate::collaborators::InMemoryCollaborators;
use crate::collaborators::InMemoryIssuance;
use crate::core::config::PoolConfig;
use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::Result;
use crate::pool::{ConservationReport, StabilityPoolService};
use crate::utils::constants::DECIMAL_PRECISION;
use crate::utils::crypto::AccountId;

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// RNG seed; equal seeds give equal runs
    pub seed: u64,
    /// Random operations before the final drain
    pub steps: usize,
    /// Number of distinct depositors
    pub depositors: usize,
    /// Largest single deposit in whole ZUSD
    pub max_deposit: u64,
    /// Chance that an offset empties the pool
    pub wipe_out_probability: f64,
    /// Chance that an offset leaves a tiny remainder and crosses scales
    pub deep_offset_probability: f64,
    /// ZERO issued on every pool operation
    pub zero_per_operation: ZeroTokenAmount,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            steps: 1_000,
            depositors: 20,
            max_deposit: 100_000,
            wipe_out_probability: 0.05,
            deep_offset_probability: 0.05,
            zero_per_operation: ZeroTokenAmount::from_whole(10),
        }
    }
}

/// What a simulation did and how the pool ended up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Seed used
    pub seed: u64,
    /// Deposits made
    pub deposits: u64,
    /// Withdrawals made during the random phase
    pub withdrawals: u64,
    /// Offsets applied
    pub offsets: u64,
    /// Offsets that emptied the pool
    pub wipe_outs: u64,
    /// Offsets that left a tiny remainder
    pub deep_offsets: u64,
    /// Epoch at the end
    pub final_epoch: u64,
    /// Highest scale reached
    pub max_scale: u64,
    /// Largest gap between the pooled total and the sum of deposits
    pub max_deposit_gap: u128,
    /// Gap the operations so far could explain by rounding
    pub gap_allowance: u128,
    /// Steps after which the gap exceeded the allowance
    pub gap_overruns: u64,
    /// Withdrawals that failed in the final drain
    pub failed_withdrawals: Vec<String>,
    /// ZUSD left in the pool after the drain
    pub residual_pooled: TokenAmount,
    /// Collateral left in custody after the drain
    pub residual_collateral: CollateralAmount,
    /// Collateral paid to depositors
    pub collateral_paid: CollateralAmount,
    /// ZERO issued
    pub zero_issued: ZeroTokenAmount,
    /// ZERO paid to depositors and front ends
    pub zero_paid: ZeroTokenAmount,
}

impl SimulationReport {
    /// Every depositor could withdraw in the final drain
    pub fn all_withdrawals_succeeded(&self) -> bool {
        self.failed_withdrawals.is_empty()
    }

    /// The pooled total never drifted further from the deposits than
    /// rounding accounts for
    pub fn gap_within_allowance(&self) -> bool {
        self.gap_overruns == 0 && self.max_deposit_gap <= self.gap_allowance
    }
}

/// Kind of a random operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A deposit
    Deposit,
    /// A withdrawal
    Withdraw,
    /// A partial offset
    Offset,
    /// An offset emptying the pool
    WipeOut,
    /// An offset leaving a tiny remainder
    DeepOffset,
    /// Nothing to do (empty pool, no depositors)
    Skip,
}

/// A running simulation
pub struct Simulation {
    config: SimulationConfig,
    rng: StdRng,
    service: StabilityPoolService,
    mocks: InMemoryCollaborators,
    manager: AccountId,
    depositors: Vec<AccountId>,
    report: SimulationReport,
}

impl Simulation {
    /// Set up a pool and its depositors
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let manager = AccountId::from_label("simulation-liquidation-manager");
        let mocks = InMemoryCollaborators {
            issuance: std::sync::Arc::new(InMemoryIssuance::with_rate(config.zero_per_operation)),
            ..InMemoryCollaborators::new()
        };
        let service = StabilityPoolService::new(PoolConfig::new(manager), mocks.bundle())?;
        let depositors = (0..config.depositors.max(1))
            .map(|i| AccountId::from_label(&format!("depositor-{}", i)))
            .collect();

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            report: SimulationReport {
                seed: config.seed,
                ..Default::default()
            },
            config,
            service,
            mocks,
            manager,
            depositors,
        })
    }

    /// The service under simulation
    pub fn service(&self) -> &StabilityPoolService {
        &self.service
    }

    /// Run all steps and the final drain
    pub fn run(self) -> Result<SimulationReport> {
        self.run_with_progress(|_| {})
    }

    /// Run all steps, calling `on_step` after each one, then drain the pool
    pub fn run_with_progress<F>(mut self, mut on_step: F) -> Result<SimulationReport>
    where
        F: FnMut(Step),
    {
        info!(seed = self.config.seed, steps = self.config.steps, "simulation started");
        for _ in 0..self.config.steps {
            let step = self.step()?;
            on_step(step);
        }
        self.drain()?;
        self.finish()
    }

    /// Perform one random operation
    pub fn step(&mut self) -> Result<Step> {
        let roll: f64 = self.rng.gen();
        let step = if roll < 0.45 {
            self.random_deposit()?
        } else if roll < 0.70 {
            self.random_withdrawal()?
        } else {
            self.random_offset()?
        };

        let scale = self.service.current_scale()?;
        self.report.max_scale = self.report.max_scale.max(scale);
        let gap = self.service.check_conservation()?.deposit_gap();
        self.report.max_deposit_gap = self.report.max_deposit_gap.max(gap);
        if gap > self.report.gap_allowance {
            warn!(step = ?step, gap, allowance = self.report.gap_allowance, "deposit gap beyond rounding");
            self.report.gap_overruns += 1;
        }
        debug!(step = ?step, scale, gap, "simulation step");
        Ok(step)
    }

    fn pick_depositor(&mut self) -> AccountId {
        let index = self.rng.gen_range(0..self.depositors.len());
        self.depositors[index]
    }

    fn random_deposit(&mut self) -> Result<Step> {
        let depositor = self.pick_depositor();
        let whole = self.rng.gen_range(1..=self.config.max_deposit) as u128;
        let fraction = self.rng.gen_range(0..DECIMAL_PRECISION);
        let amount = TokenAmount::from_raw(whole * DECIMAL_PRECISION + fraction);

        self.mocks.stablecoin.mint(&depositor, amount)?;
        self.service.deposit(depositor, amount, None)?;
        self.report.deposits += 1;
        self.widen_allowance(ConservationReport::deposit_allowance(amount));
        Ok(Step::Deposit)
    }

    fn random_withdrawal(&mut self) -> Result<Step> {
        let depositor = self.pick_depositor();
        let compounded = self.service.compounded_deposit(&depositor)?;
        if compounded.is_zero() {
            return Ok(Step::Skip);
        }
        // occasionally ask for more than the deposit to exercise clamping
        let percent = self.rng.gen_range(1..=120u128);
        let amount = compounded.raw().saturating_mul(percent) / 100;
        if amount == 0 {
            return Ok(Step::Skip);
        }

        self.service.withdraw(depositor, TokenAmount::from_raw(amount))?;
        self.report.withdrawals += 1;
        self.widen_allowance(4);
        Ok(Step::Withdraw)
    }

    fn random_offset(&mut self) -> Result<Step> {
        let total = self.service.total_pooled()?.raw();
        if total == 0 {
            return Ok(Step::Skip);
        }

        let roll: f64 = self.rng.gen();
        let (debt, step) = if roll < self.config.wipe_out_probability {
            (total, Step::WipeOut)
        } else if roll < self.config.wipe_out_probability + self.config.deep_offset_probability {
            let digits = self.rng.gen_range(10..=12u32);
            let remainder = (total / 10u128.pow(digits)).max(1);
            (total - remainder, Step::DeepOffset)
        } else {
            let percent = self.rng.gen_range(1..=60u128);
            ((total / 100).saturating_mul(percent).max(1), Step::Offset)
        };
        if debt == 0 {
            return Ok(Step::Skip);
        }

        let price = self.rng.gen_range(20_000..=100_000u128);
        let collateral = CollateralAmount::from_raw(debt / price);
        let outcome = self
            .service
            .offset(&self.manager, TokenAmount::from_raw(debt), collateral)?;

        if outcome.applied {
            self.report.offsets += 1;
            let allowance = ConservationReport::offset_allowance(
                TokenAmount::from_raw(total),
                self.service.total_pooled()?,
                outcome.p,
                self.depositors.len(),
            );
            self.widen_allowance(allowance);
            match step {
                Step::WipeOut => self.report.wipe_outs += 1,
                Step::DeepOffset => self.report.deep_offsets += 1,
                _ => {}
            }
        }
        Ok(step)
    }

    fn widen_allowance(&mut self, amount: u128) {
        self.report.gap_allowance = self.report.gap_allowance.saturating_add(amount);
    }

    /// Every depositor withdraws everything
    fn drain(&mut self) -> Result<()> {
        for depositor in self.service.depositors()? {
            if let Err(e) = self
                .service
                .withdraw(depositor, TokenAmount::from_raw(u128::MAX))
            {
                warn!(depositor = %depositor, error = %e, "final withdrawal failed");
                self.report.failed_withdrawals.push(format!("{}: {}", depositor, e));
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<SimulationReport> {
        let stats = self.service.stats()?;
        self.report.final_epoch = stats.epoch;
        self.report.residual_pooled = stats.total_pooled;
        self.report.residual_collateral = self.mocks.custody.balance();
        self.report.collateral_paid = stats.stats.total_collateral_paid;
        self.report.zero_issued = self.mocks.issuance.total_issued();
        self.report.zero_paid = stats.stats.zero_paid;

        info!(
            offsets = self.report.offsets,
            wipe_outs = self.report.wipe_outs,
            max_scale = self.report.max_scale,
            failed = self.report.failed_withdrawals.len(),
            "simulation finished"
        );
        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            steps: 200,
            depositors: 5,
            wipe_out_probability: 0.1,
            deep_offset_probability: 0.15,
            ..Default::default()
        }
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let first = Simulation::new(small_config(7)).unwrap().run().unwrap();
        let second = Simulation::new(small_config(7)).unwrap().run().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_all_depositors_can_withdraw() {
        let report = Simulation::new(small_config(11)).unwrap().run().unwrap();
        assert!(report.all_withdrawals_succeeded(), "{:?}", report.failed_withdrawals);
        assert!(report.offsets > 0);
        assert!(report.zero_paid <= report.zero_issued);
        assert!(report.gap_within_allowance(), "{} > {}", report.max_deposit_gap, report.gap_allowance);
    }
}
