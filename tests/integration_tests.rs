//! Integration tests for the ZUSD stability pool.
//!
//! These tests drive the service end to end with in-memory collaborators and
//! check the token movements together with the ledger.

use zusd::collaborators::{CollateralCustody, CollateralDestination, InMemoryCollaborators};
use zusd::core::config::{PoolConfig, WithdrawalPolicy};
use zusd::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use zusd::error::Error;
use zusd::pool::StabilityPoolService;
use zusd::simulation::{Simulation, SimulationConfig};
use zusd::storage::{FileStore, PoolStore};
use zusd::utils::constants::DECIMAL_PRECISION;
use zusd::utils::crypto::AccountId;
use zusd::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

struct Harness {
    mocks: InMemoryCollaborators,
    service: StabilityPoolService,
    manager: AccountId,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(adjust: impl FnOnce(PoolConfig) -> PoolConfig) -> Self {
        let manager = AccountId::from_label("liquidation-manager");
        let mocks = InMemoryCollaborators::new();
        let config = adjust(PoolConfig::new(manager));
        let service = StabilityPoolService::new(config, mocks.bundle()).unwrap();
        Self {
            mocks,
            service,
            manager,
        }
    }

    fn deposit(&self, label: &str, whole: u64) -> AccountId {
        let depositor = AccountId::from_label(label);
        let amount = TokenAmount::from_whole(whole);
        self.mocks.stablecoin.mint(&depositor, amount).unwrap();
        self.service.deposit(depositor, amount, None).unwrap();
        depositor
    }

    fn offset(&self, debt: TokenAmount, collateral: CollateralAmount) {
        self.service.offset(&self.manager, debt, collateral).unwrap();
    }

    fn assert_balances_in_step(&self) {
        assert_eq!(self.mocks.stablecoin.pool_balance(), self.service.total_pooled().unwrap());
        assert_eq!(
            self.mocks.custody.balance(),
            self.service.stats().unwrap().total_collateral
        );
    }
}

fn units(raw: u128) -> TokenAmount {
    TokenAmount::from_raw(raw)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_three_depositors_share_an_offset() {
    let h = Harness::new();
    let alice = h.deposit("alice", 100);
    let bob = h.deposit("bob", 200);
    let carol = h.deposit("carol", 300);

    h.offset(TokenAmount::from_whole(150), CollateralAmount::parse("1.5").unwrap());
    h.assert_balances_in_step();

    // a quarter of each deposit is lost, the loss per unit rounding up by one wei
    assert_eq!(h.service.compounded_deposit(&alice).unwrap(), units(74_999_999_999_999_999_900));
    assert_eq!(h.service.compounded_deposit(&bob).unwrap(), units(149_999_999_999_999_999_800));
    assert_eq!(h.service.compounded_deposit(&carol).unwrap(), units(224_999_999_999_999_999_700));
    assert_eq!(
        h.service.depositor_collateral_gain(&carol).unwrap(),
        CollateralAmount::parse("0.75").unwrap()
    );

    for depositor in [alice, bob, carol] {
        h.service.withdraw(depositor, units(u128::MAX)).unwrap();
    }

    assert_eq!(h.mocks.stablecoin.balance_of(&alice), units(74_999_999_999_999_999_900));
    assert_eq!(h.mocks.stablecoin.balance_of(&carol), units(224_999_999_999_999_999_700));
    assert_eq!(
        h.mocks.custody.paid_to(&CollateralDestination::Account(bob)),
        CollateralAmount::parse("0.5").unwrap()
    );
    assert_eq!(h.mocks.stablecoin.burned(), TokenAmount::from_whole(150));
    // the rounding remainder stays behind
    assert_eq!(h.service.total_pooled().unwrap(), units(600));
    assert!(h.mocks.custody.balance().is_zero());
    h.assert_balances_in_step();
}

#[test]
fn test_emptied_pool_starts_a_new_epoch() {
    let h = Harness::new();
    let alice = h.deposit("alice", 100);

    h.offset(TokenAmount::from_whole(100), CollateralAmount::from_whole(1));
    assert_eq!(h.service.current_epoch().unwrap(), 1);
    assert_eq!(h.service.p().unwrap(), FixedPoint::ONE);
    assert!(h.service.compounded_deposit(&alice).unwrap().is_zero());

    let bob = h.deposit("bob", 50);
    h.offset(TokenAmount::from_whole(10), CollateralAmount::parse("0.1").unwrap());

    // alice's position is frozen at the end of her epoch
    assert!(h.service.compounded_deposit(&alice).unwrap().is_zero());
    assert_eq!(
        h.service.depositor_collateral_gain(&alice).unwrap(),
        CollateralAmount::from_whole(1)
    );
    assert_eq!(h.service.compounded_deposit(&bob).unwrap(), units(39_999_999_999_999_999_950));
    assert_eq!(
        h.service.depositor_collateral_gain(&bob).unwrap(),
        CollateralAmount::parse("0.1").unwrap()
    );

    let outcome = h.service.withdraw(alice, TokenAmount::from_whole(1)).unwrap();
    assert!(outcome.withdrawn.is_zero());
    assert_eq!(outcome.collateral_gain, CollateralAmount::from_whole(1));
    assert!(!h.service.depositors().unwrap().contains(&alice));
    h.assert_balances_in_step();
}

#[test]
fn test_deep_offsets_cross_scales_and_everyone_withdraws() {
    let h = Harness::new();
    let depositors: Vec<_> = (0..10)
        .map(|i| h.deposit(&format!("depositor-{}", i), 1_000 + i * 37))
        .collect();

    // leave one billionth of the pool twice
    for _ in 0..2 {
        let total = h.service.total_pooled().unwrap().raw();
        let remainder = total / 1_000_000_000;
        h.offset(units(total - remainder), CollateralAmount::from_whole(1));
    }
    assert!(h.service.current_scale().unwrap() >= 1);
    assert_eq!(h.service.current_epoch().unwrap(), 0);

    let report = h.service.check_conservation().unwrap();
    assert!(report.deposit_gap() < DECIMAL_PRECISION / 1_000_000);

    for depositor in &depositors {
        h.service.withdraw(*depositor, units(u128::MAX)).unwrap();
    }
    assert!(h.service.depositors().unwrap().is_empty());
    assert_eq!(
        h.mocks.stablecoin.pool_balance(),
        h.service.total_pooled().unwrap()
    );
}

#[test]
fn test_topping_up_settles_gains_first() {
    let h = Harness::new();
    let alice = h.deposit("alice", 100);
    let _bob = h.deposit("bob", 100);
    h.offset(TokenAmount::from_whole(50), CollateralAmount::from_whole(1));

    h.mocks.stablecoin.mint(&alice, TokenAmount::from_whole(25)).unwrap();
    let outcome = h
        .service
        .deposit(alice, TokenAmount::from_whole(25), None)
        .unwrap();

    assert_eq!(outcome.stake_loss, units(25_000_000_000_000_000_100));
    assert_eq!(outcome.collateral_gain, CollateralAmount::parse("0.5").unwrap());
    assert_eq!(outcome.new_deposit, units(99_999_999_999_999_999_900));
    assert!(h.service.depositor_collateral_gain(&alice).unwrap().is_zero());
    h.assert_balances_in_step();
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRONT END AND REWARD TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_front_end_kickback_split() {
    let h = Harness::new();
    let front_end = AccountId::from_label("front-end");
    let depositor = AccountId::from_label("dana");

    h.service
        .register_front_end(front_end, FixedPoint::from_percentage(80))
        .unwrap();
    h.mocks.stablecoin.mint(&depositor, TokenAmount::from_whole(100)).unwrap();
    h.service
        .deposit(depositor, TokenAmount::from_whole(100), Some(front_end))
        .unwrap();
    assert_eq!(
        h.service.compounded_front_end_stake(&front_end).unwrap(),
        TokenAmount::from_whole(100)
    );

    h.mocks.issuance.schedule(ZeroTokenAmount::from_whole(100));
    let outcome = h.service.claim_gains(depositor).unwrap();

    assert_eq!(outcome.zero_gain, ZeroTokenAmount::from_whole(80));
    assert_eq!(outcome.front_end_zero_gain, ZeroTokenAmount::from_whole(20));
    assert_eq!(h.mocks.issuance.balance_of(&depositor), ZeroTokenAmount::from_whole(80));
    assert_eq!(h.mocks.issuance.balance_of(&front_end), ZeroTokenAmount::from_whole(20));
    assert!(h.mocks.issuance.held().is_zero());
}

#[test]
fn test_front_end_cannot_deposit_and_depositor_cannot_register() {
    let h = Harness::new();
    let front_end = AccountId::from_label("front-end");
    h.service
        .register_front_end(front_end, FixedPoint::ONE)
        .unwrap();

    h.mocks.stablecoin.mint(&front_end, TokenAmount::from_whole(10)).unwrap();
    assert!(matches!(
        h.service.deposit(front_end, TokenAmount::from_whole(10), None),
        Err(Error::FrontEndCannotDeposit(_))
    ));
    // the rejected deposit left the caller's balance alone
    assert_eq!(h.mocks.stablecoin.balance_of(&front_end), TokenAmount::from_whole(10));

    let alice = h.deposit("alice", 10);
    assert!(matches!(
        h.service.register_front_end(alice, FixedPoint::ONE),
        Err(Error::DepositorCannotRegister(_))
    ));
}

#[test]
fn test_issuance_into_empty_pool_is_not_distributed() {
    let h = Harness::new();
    h.mocks.issuance.set_rate(ZeroTokenAmount::from_whole(5));

    let alice = h.deposit("alice", 100);
    let stats = h.service.stats().unwrap();
    assert_eq!(stats.stats.zero_undistributed, ZeroTokenAmount::from_whole(5));
    assert!(h.service.depositor_zero_gain(&alice).unwrap().is_zero());

    let outcome = h.service.claim_gains(alice).unwrap();
    assert_eq!(outcome.zero_gain, ZeroTokenAmount::from_whole(5));
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUTHORIZATION AND POLICY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_only_liquidation_manager_can_offset() {
    let h = Harness::new();
    h.deposit("alice", 100);
    let intruder = AccountId::from_label("intruder");

    let result = h
        .service
        .offset(&intruder, TokenAmount::from_whole(10), CollateralAmount::from_whole(1));
    assert!(matches!(result, Err(Error::Unauthorized(_))));
    assert_eq!(h.service.total_pooled().unwrap(), TokenAmount::from_whole(100));
}

#[test]
fn test_offset_larger_than_pool_is_rejected() {
    let h = Harness::new();
    h.deposit("alice", 100);

    let result = h.service.offset(
        &h.manager,
        TokenAmount::from_whole(101),
        CollateralAmount::from_whole(1),
    );
    assert!(matches!(result, Err(Error::OffsetExceedsPool { .. })));
    h.assert_balances_in_step();
}

#[test]
fn test_reject_policy_refuses_over_withdrawal() {
    let h = Harness::with_config(|c| c.with_withdrawal_policy(WithdrawalPolicy::Reject));
    let alice = h.deposit("alice", 100);

    assert!(matches!(
        h.service.withdraw(alice, TokenAmount::from_whole(101)),
        Err(Error::WithdrawalExceedsDeposit { .. })
    ));
    h.service.withdraw(alice, TokenAmount::from_whole(100)).unwrap();
    assert!(!h.service.depositors().unwrap().contains(&alice));
}

#[test]
fn test_withdrawal_blocked_by_undercollateralized_lines() {
    let h = Harness::new();
    let alice = h.deposit("alice", 100);
    let borrower = AccountId::from_label("borrower");
    h.mocks.lines.open(&borrower, CollateralAmount::from_whole(1)).unwrap();
    h.mocks.lines.set_undercollateralized(&borrower, true).unwrap();

    assert!(matches!(
        h.service.withdraw(alice, TokenAmount::from_whole(10)),
        Err(Error::UndercollateralizedLinesPending)
    ));

    h.mocks.lines.set_undercollateralized(&borrower, false).unwrap();
    h.service.withdraw(alice, TokenAmount::from_whole(10)).unwrap();
}

#[test]
fn test_collateral_gain_moves_into_line_of_credit() {
    let h = Harness::new();
    let alice = h.deposit("alice", 100);
    h.offset(TokenAmount::from_whole(20), CollateralAmount::from_whole(2));

    assert!(matches!(
        h.service.withdraw_gain_to_line_of_credit(alice),
        Err(Error::NoActiveLineOfCredit(_))
    ));

    h.mocks.lines.open(&alice, CollateralAmount::from_whole(3)).unwrap();
    let outcome = h.service.withdraw_gain_to_line_of_credit(alice).unwrap();

    assert_eq!(outcome.collateral_gain, CollateralAmount::from_whole(2));
    assert_eq!(h.mocks.lines.collateral_of(&alice), CollateralAmount::from_whole(5));
    assert_eq!(
        h.mocks.custody.paid_to(&CollateralDestination::LineOfCredit(alice)),
        CollateralAmount::from_whole(2)
    );
    assert_eq!(h.service.compounded_deposit(&alice).unwrap(), units(79_999_999_999_999_999_900));
    h.assert_balances_in_step();
}

#[test]
fn test_failed_collateral_payout_is_reported() {
    let h = Harness::new();
    let alice = h.deposit("alice", 100);
    h.offset(TokenAmount::from_whole(10), CollateralAmount::from_whole(1));

    h.mocks.custody.set_frozen(true);
    assert!(matches!(
        h.service.claim_gains(alice),
        Err(Error::Collaborator { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENCE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_pool_survives_file_store_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    let alice = h.deposit("alice", 300);
    let bob = h.deposit("bob", 100);
    h.offset(TokenAmount::from_whole(200), CollateralAmount::from_whole(4));

    let hash = {
        let store = PoolStore::new(FileStore::new(temp_dir.path()).unwrap());
        store.save_config(h.service.config()).unwrap();
        store.append_events(&h.service.history().unwrap()).unwrap();
        store.save_pool(&h.service.snapshot().unwrap()).unwrap()
    };

    let store = PoolStore::new(FileStore::new(temp_dir.path()).unwrap());
    let config = store.load_config().unwrap().unwrap();
    let pool = store.load_pool().unwrap().unwrap();
    assert_eq!(pool.state_hash().unwrap(), hash);

    let mocks = InMemoryCollaborators::new();
    mocks.stablecoin.fund_pool(pool.total_pooled()).unwrap();
    mocks.custody.receive_liquidated(pool.total_collateral()).unwrap();
    let restored = StabilityPoolService::with_pool(config, pool, mocks.bundle()).unwrap();

    for depositor in [alice, bob] {
        assert_eq!(
            restored.compounded_deposit(&depositor).unwrap(),
            h.service.compounded_deposit(&depositor).unwrap()
        );
        assert_eq!(
            restored.depositor_collateral_gain(&depositor).unwrap(),
            h.service.depositor_collateral_gain(&depositor).unwrap()
        );
    }
    assert_eq!(
        store.load_events().unwrap().len(),
        h.service.history().unwrap().len()
    );

    let outcome = restored.withdraw(alice, units(u128::MAX)).unwrap();
    assert_eq!(outcome.withdrawn, units(149_999_999_999_999_999_700));
    assert_eq!(mocks.stablecoin.balance_of(&alice), outcome.withdrawn);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_simulations_drain_cleanly() {
    for seed in [1, 2, 3] {
        let report = Simulation::new(SimulationConfig {
            seed,
            steps: 300,
            depositors: 8,
            ..Default::default()
        })
        .unwrap()
        .run()
        .unwrap();

        assert!(report.all_withdrawals_succeeded(), "seed {}: {:?}", seed, report.failed_withdrawals);
        assert!(report.zero_paid <= report.zero_issued);
        assert!(report.residual_pooled.raw() < DECIMAL_PRECISION);
        assert!(
            report.gap_within_allowance(),
            "seed {}: gap {} over allowance {} ({} overruns)",
            seed,
            report.max_deposit_gap,
            report.gap_allowance,
            report.gap_overruns
        );
    }
}
