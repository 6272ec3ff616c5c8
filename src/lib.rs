//! # ZUSD Stability Pool
//!
//! The first line of defence of the ZUSD stablecoin. Depositors pool ZUSD;
//! when a line of credit is liquidated its debt is cancelled against the
//! pool and its collateral is shared among depositors pro rata.
//!
//! ## Architecture
//!
//! - **Pool**: the ledger. A running product `P` and the sums `S` (collateral)
//!   and `G` (ZERO rewards), keyed by epoch and scale, give every depositor's
//!   compounded deposit and gains in O(1), whatever the number of depositors
//! - **Collaborators**: the token ledger, collateral custody, lines of credit
//!   and reward issuance behind traits
//! - **Storage**: hash-verified snapshots and the event history
//! - **Simulation**: seeded randomized runs over the whole service
//!
//! ## Example
//!
//! ```rust,ignore
//! use zusd::prelude::*;
//!
//! let mocks = InMemoryCollaborators::new();
//! let service = StabilityPoolService::new(PoolConfig::new(manager), mocks.bundle())?;
//!
//! service.deposit(alice, TokenAmount::from_whole(1_000), None)?;
//! service.offset(&manager, TokenAmount::from_whole(400), CollateralAmount::from_whole(2))?;
//!
//! // losses round up, so the deposit ends a few wei under 600
//! let left = service.compounded_deposit(&alice)?;
//! assert_eq!(left, TokenAmount::from_raw(599_999_999_999_999_999_000));
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod cli;
pub mod collaborators;
pub mod core;
pub mod error;
pub mod events;
pub mod pool;
pub mod simulation;
pub mod storage;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::{
        CollateralCustody, CollateralDestination, Collaborators, CommunityIssuance,
        InMemoryCollaborators, LineOfCreditManager, StablecoinLedger,
    };
    pub use crate::core::{
        config::{PoolConfig, PoolParams, WithdrawalPolicy},
        token::{CollateralAmount, TokenAmount, ZeroTokenAmount},
    };
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventRecord, PoolEvent};
    pub use crate::pool::{
        DepositorOutcome, OffsetOutcome, Settlement, StabilityPool, StabilityPoolService,
    };
    pub use crate::utils::{
        crypto::{AccountId, Hash},
        math::FixedPoint,
    };
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "ZUSD";
