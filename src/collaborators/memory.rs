//! In-memory collaborators for tests, the CLI and simulations.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::RwLock;

use super::{
    CollateralCustody, CollateralDestination, CommunityIssuance, LineOfCreditManager,
    StablecoinLedger,
};
use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::{Error, Result};
use crate::utils::crypto::AccountId;

// ═══════════════════════════════════════════════════════════════════════════════
// STABLECOIN
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
struct StablecoinBalances {
    accounts: BTreeMap<AccountId, TokenAmount>,
    pool: TokenAmount,
    burned: TokenAmount,
}

/// ZUSD ledger backed by a map of balances
#[derive(Debug, Default)]
pub struct InMemoryStablecoin {
    balances: RwLock<StablecoinBalances>,
}

impl InMemoryStablecoin {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `account` out of thin air
    pub fn mint(&self, account: &AccountId, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().map_err(|_| Error::Lock)?;
        let balance = balances.accounts.entry(*account).or_default();
        *balance = balance.checked_add(amount).ok_or_else(|| Error::Overflow {
            operation: "mint".into(),
        })?;
        Ok(())
    }

    /// Credit `amount` directly to the pool's account
    pub fn fund_pool(&self, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().map_err(|_| Error::Lock)?;
        balances.pool = balances.pool.saturating_add(amount);
        Ok(())
    }

    /// Balance of `account`
    pub fn balance_of(&self, account: &AccountId) -> TokenAmount {
        self.balances
            .read()
            .map(|b| b.accounts.get(account).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// ZUSD held by the pool
    pub fn pool_balance(&self) -> TokenAmount {
        self.balances.read().map(|b| b.pool).unwrap_or_default()
    }

    /// ZUSD burned by offsets
    pub fn burned(&self) -> TokenAmount {
        self.balances.read().map(|b| b.burned).unwrap_or_default()
    }
}

impl StablecoinLedger for InMemoryStablecoin {
    fn pull_into_pool(&self, from: &AccountId, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().map_err(|_| Error::Lock)?;
        let available = balances.accounts.get(from).copied().unwrap_or_default();
        let remaining = available.checked_sub(amount).ok_or_else(|| {
            Error::collaborator(
                "stablecoin",
                format!("{} holds {} but {} was requested", from, available, amount),
            )
        })?;
        balances.accounts.insert(*from, remaining);
        balances.pool = balances.pool.saturating_add(amount);
        Ok(())
    }

    fn pay_from_pool(&self, to: &AccountId, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().map_err(|_| Error::Lock)?;
        balances.pool = balances.pool.checked_sub(amount).ok_or_else(|| {
            Error::collaborator("stablecoin", format!("pool holds less than {}", amount))
        })?;
        let balance = balances.accounts.entry(*to).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    fn burn_from_pool(&self, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.write().map_err(|_| Error::Lock)?;
        balances.pool = balances.pool.checked_sub(amount).ok_or_else(|| {
            Error::collaborator("stablecoin", format!("cannot burn {} from pool", amount))
        })?;
        balances.burned = balances.burned.saturating_add(amount);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL CUSTODY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
struct CustodyState {
    held: CollateralAmount,
    paid: BTreeMap<CollateralDestinationKey, CollateralAmount>,
    frozen: bool,
}

/// Ordering key so payouts can be kept in a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CollateralDestinationKey {
    Account(AccountId),
    LineOfCredit(AccountId),
}

impl From<&CollateralDestination> for CollateralDestinationKey {
    fn from(destination: &CollateralDestination) -> Self {
        match destination {
            CollateralDestination::Account(a) => Self::Account(*a),
            CollateralDestination::LineOfCredit(a) => Self::LineOfCredit(*a),
        }
    }
}

/// Collateral custody that tracks what it holds and what it paid out
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    state: RwLock<CustodyState>,
}

impl InMemoryCustody {
    /// Create an empty custody
    pub fn new() -> Self {
        Self::default()
    }

    /// Collateral paid to `destination` so far
    pub fn paid_to(&self, destination: &CollateralDestination) -> CollateralAmount {
        self.state
            .read()
            .map(|s| {
                s.paid
                    .get(&CollateralDestinationKey::from(destination))
                    .copied()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Make every payout fail until unfrozen
    pub fn set_frozen(&self, frozen: bool) {
        if let Ok(mut state) = self.state.write() {
            state.frozen = frozen;
        }
    }
}

impl CollateralCustody for InMemoryCustody {
    fn receive_liquidated(&self, amount: CollateralAmount) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        state.held = state.held.saturating_add(amount);
        Ok(())
    }

    fn pay_out(&self, destination: &CollateralDestination, amount: CollateralAmount) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        if state.frozen {
            return Err(Error::collaborator("custody", "payouts are frozen"));
        }
        let held = state.held;
        state.held = held.checked_sub(amount).ok_or_else(|| {
            Error::collaborator("custody", format!("holds {} but {} was requested", held, amount))
        })?;
        let paid = state
            .paid
            .entry(CollateralDestinationKey::from(destination))
            .or_default();
        *paid = paid.saturating_add(amount);
        Ok(())
    }

    fn balance(&self) -> CollateralAmount {
        self.state.read().map(|s| s.held).unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINES OF CREDIT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
struct LinesState {
    collateral: BTreeMap<AccountId, CollateralAmount>,
    undercollateralized: BTreeSet<AccountId>,
}

/// Lines of credit reduced to their collateral and a health flag
#[derive(Debug, Default)]
pub struct InMemoryLines {
    state: RwLock<LinesState>,
}

impl InMemoryLines {
    /// Create with no open lines
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a line of credit for `owner`
    pub fn open(&self, owner: &AccountId, collateral: CollateralAmount) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        state.collateral.insert(*owner, collateral);
        Ok(())
    }

    /// Close the line of `owner`
    pub fn close(&self, owner: &AccountId) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        state.collateral.remove(owner);
        state.undercollateralized.remove(owner);
        Ok(())
    }

    /// Flag the line of `owner` as below the minimum collateral ratio
    pub fn set_undercollateralized(&self, owner: &AccountId, flag: bool) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        if flag {
            state.undercollateralized.insert(*owner);
        } else {
            state.undercollateralized.remove(owner);
        }
        Ok(())
    }

    /// Collateral in the line of `owner`
    pub fn collateral_of(&self, owner: &AccountId) -> CollateralAmount {
        self.state
            .read()
            .map(|s| s.collateral.get(owner).copied().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl LineOfCreditManager for InMemoryLines {
    fn has_active_line(&self, owner: &AccountId) -> bool {
        self.state
            .read()
            .map(|s| s.collateral.contains_key(owner))
            .unwrap_or(false)
    }

    fn has_undercollateralized_lines(&self) -> bool {
        self.state
            .read()
            .map(|s| !s.undercollateralized.is_empty())
            .unwrap_or(false)
    }

    fn top_up_collateral(&self, owner: &AccountId, amount: CollateralAmount) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        let collateral = state.collateral.get_mut(owner).ok_or_else(|| {
            Error::collaborator("lines", format!("{} has no line of credit", owner))
        })?;
        *collateral = collateral.saturating_add(amount);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMUNITY ISSUANCE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
struct IssuanceState {
    per_call: ZeroTokenAmount,
    scheduled: VecDeque<ZeroTokenAmount>,
    issued: ZeroTokenAmount,
    held: ZeroTokenAmount,
    balances: BTreeMap<AccountId, ZeroTokenAmount>,
}

/// ZERO issuance that mints a fixed amount per call, or a queued schedule
#[derive(Debug, Default)]
pub struct InMemoryIssuance {
    state: RwLock<IssuanceState>,
}

impl InMemoryIssuance {
    /// Issue nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `amount` on every call
    pub fn with_rate(amount: ZeroTokenAmount) -> Self {
        let issuance = Self::default();
        issuance.set_rate(amount);
        issuance
    }

    /// Change the per-call amount
    pub fn set_rate(&self, amount: ZeroTokenAmount) {
        if let Ok(mut state) = self.state.write() {
            state.per_call = amount;
        }
    }

    /// Issue `amount` on the next call instead of the per-call amount
    pub fn schedule(&self, amount: ZeroTokenAmount) {
        if let Ok(mut state) = self.state.write() {
            state.scheduled.push_back(amount);
        }
    }

    /// ZERO issued so far
    pub fn total_issued(&self) -> ZeroTokenAmount {
        self.state.read().map(|s| s.issued).unwrap_or_default()
    }

    /// ZERO issued but not yet sent
    pub fn held(&self) -> ZeroTokenAmount {
        self.state.read().map(|s| s.held).unwrap_or_default()
    }

    /// ZERO received by `account`
    pub fn balance_of(&self, account: &AccountId) -> ZeroTokenAmount {
        self.state
            .read()
            .map(|s| s.balances.get(account).copied().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl CommunityIssuance for InMemoryIssuance {
    fn issue(&self) -> ZeroTokenAmount {
        match self.state.write() {
            Ok(mut state) => {
                let amount = match state.scheduled.pop_front() {
                    Some(amount) => amount,
                    None => state.per_call,
                };
                state.issued = state.issued.saturating_add(amount);
                state.held = state.held.saturating_add(amount);
                amount
            }
            Err(_) => ZeroTokenAmount::ZERO,
        }
    }

    fn send(&self, recipient: &AccountId, amount: ZeroTokenAmount) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Lock)?;
        let held = state.held;
        state.held = held.checked_sub(amount).ok_or_else(|| {
            Error::collaborator("issuance", format!("holds {} but {} was requested", held, amount))
        })?;
        let balance = state.balances.entry(*recipient).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}
