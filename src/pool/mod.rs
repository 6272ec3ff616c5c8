//! The stability pool.
//!
//! - `accounting`: the global accumulators `P`, `S`, `G` and the offset math
//! - `deposit`, `front_end`, `snapshot`: per-account records
//! - `stability_pool`: the ledger tying them together
//! - `service`: the locked ledger wired to its collaborators

pub mod accounting;
pub mod deposit;
pub mod front_end;
pub mod service;
pub mod snapshot;
pub mod stability_pool;

pub use accounting::{GlobalState, IssuancePlan, OffsetPlan, SumTable, SumView};
pub use deposit::DepositRecord;
pub use front_end::FrontEnd;
pub use service::StabilityPoolService;
pub use snapshot::{FrontEndSnapshot, Snapshot};
pub use stability_pool::{
    ConservationReport, DepositorOutcome, FrontEndSettlement, GainDestination, OffsetOutcome,
    PoolStatistics, PoolStats, Settlement, StabilityPool,
};
