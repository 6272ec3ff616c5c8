//! External collaborators of the stability pool.
//!
//! The pool never holds tokens itself. Moving ZUSD, holding liquidated
//! collateral, topping up lines of credit and minting ZERO are delegated to
//! these traits, supplied once when the service is built.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use crate::error::Result;
use crate::utils::crypto::AccountId;

pub use memory::{InMemoryCustody, InMemoryIssuance, InMemoryLines, InMemoryStablecoin};

// ═══════════════════════════════════════════════════════════════════════════════
// TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// ZUSD token ledger
pub trait StablecoinLedger: Send + Sync {
    /// Move `amount` from `from` into the pool's account
    fn pull_into_pool(&self, from: &AccountId, amount: TokenAmount) -> Result<()>;

    /// Move `amount` from the pool's account to `to`
    fn pay_from_pool(&self, to: &AccountId, amount: TokenAmount) -> Result<()>;

    /// Destroy `amount` held by the pool (debt cancelled by an offset)
    fn burn_from_pool(&self, amount: TokenAmount) -> Result<()>;
}

/// Where custody sends collateral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralDestination {
    /// A plain account
    Account(AccountId),
    /// The line of credit owned by the account
    LineOfCredit(AccountId),
}

impl fmt::Display for CollateralDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(account) => write!(f, "account {}", account),
            Self::LineOfCredit(account) => write!(f, "line of credit of {}", account),
        }
    }
}

/// Holder of the collateral earned by depositors
pub trait CollateralCustody: Send + Sync {
    /// Accept collateral seized by a liquidation
    fn receive_liquidated(&self, amount: CollateralAmount) -> Result<()>;

    /// Send collateral out of custody
    fn pay_out(&self, destination: &CollateralDestination, amount: CollateralAmount) -> Result<()>;

    /// Collateral currently held
    fn balance(&self) -> CollateralAmount;
}

/// Lines of credit (troves) of the lending side
pub trait LineOfCreditManager: Send + Sync {
    /// Check whether `owner` has an open line of credit
    fn has_active_line(&self, owner: &AccountId) -> bool;

    /// Check whether any line of credit is below the minimum collateral ratio
    fn has_undercollateralized_lines(&self) -> bool;

    /// Add collateral already released by custody to the owner's line
    fn top_up_collateral(&self, owner: &AccountId, amount: CollateralAmount) -> Result<()>;
}

/// ZERO reward issuance
pub trait CommunityIssuance: Send + Sync {
    /// Mint the ZERO accrued since the previous call and hand it to the pool
    fn issue(&self) -> ZeroTokenAmount;

    /// Transfer ZERO held for the pool to `recipient`
    fn send(&self, recipient: &AccountId, amount: ZeroTokenAmount) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUNDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// All collaborators of one pool
#[derive(Clone)]
pub struct Collaborators {
    /// ZUSD ledger
    pub stablecoin: Arc<dyn StablecoinLedger>,
    /// Collateral custody
    pub custody: Arc<dyn CollateralCustody>,
    /// Lines of credit
    pub lines: Arc<dyn LineOfCreditManager>,
    /// ZERO issuance
    pub issuance: Arc<dyn CommunityIssuance>,
}

impl Collaborators {
    /// Bundle the given collaborators
    pub fn new(
        stablecoin: Arc<dyn StablecoinLedger>,
        custody: Arc<dyn CollateralCustody>,
        lines: Arc<dyn LineOfCreditManager>,
        issuance: Arc<dyn CommunityIssuance>,
    ) -> Self {
        Self {
            stablecoin,
            custody,
            lines,
            issuance,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("custody_balance", &self.custody.balance())
            .finish_non_exhaustive()
    }
}

/// In-memory collaborators, with handles kept for inspection
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollaborators {
    /// ZUSD ledger
    pub stablecoin: Arc<InMemoryStablecoin>,
    /// Collateral custody
    pub custody: Arc<InMemoryCustody>,
    /// Lines of credit
    pub lines: Arc<InMemoryLines>,
    /// ZERO issuance
    pub issuance: Arc<InMemoryIssuance>,
}

impl InMemoryCollaborators {
    /// Fresh collaborators with empty balances and no issuance
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object bundle sharing the same state
    pub fn bundle(&self) -> Collaborators {
        Collaborators::new(
            self.stablecoin.clone(),
            self.custody.clone(),
            self.lines.clone(),
            self.issuance.clone(),
        )
    }
}
