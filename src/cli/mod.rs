//! Command-line support for operating a persisted stability pool.
//!
//! The `zusd` binary keeps one pool per data directory. Each invocation opens
//! a [`Workspace`], runs one operation through the service and commits the
//! ledger and its new events back to disk.
//!
//! There is no external token ledger behind the CLI: the in-memory
//! collaborators are seeded from the persisted totals on open, and deposits
//! mint the depositor's ZUSD just before it is pulled into the pool.

pub mod config;
pub mod output;

pub use config::{CliConfig, ConfigError};
pub use output::{OutputFormat, OutputFormatter};

use tracing::{debug, info};

use crate::collaborators::{CollateralCustody, InMemoryCollaborators};
use crate::core::config::PoolConfig;
use crate::core::token::{parse_units, TokenAmount};
use crate::error::{Error, Result};
use crate::pool::{StabilityPool, StabilityPoolService};
use crate::storage::{FileStore, PoolStore};
use crate::utils::crypto::{AccountId, Hash};
use crate::utils::math::FixedPoint;

/// A pool persisted in a data directory, opened for one command
pub struct Workspace {
    store: PoolStore<FileStore>,
    service: StabilityPoolService,
    mocks: InMemoryCollaborators,
    event_base: u64,
}

impl Workspace {
    /// Create a new empty pool in the data directory
    pub fn init(cli: &CliConfig, pool_config: PoolConfig, force: bool) -> Result<Self> {
        let store = Self::open_store(cli)?;
        if store.has_pool()? && !force {
            return Err(Error::Storage(format!(
                "a pool already exists in {}",
                cli.data_dir.display()
            )));
        }

        store.save_config(&pool_config)?;
        let pool = StabilityPool::from_config(&pool_config)?;
        store.save_pool(&pool)?;
        info!(data_dir = %cli.data_dir.display(), "pool initialized");

        Self::assemble(store, pool_config, pool)
    }

    /// Open the pool stored in the data directory
    pub fn open(cli: &CliConfig) -> Result<Self> {
        let store = Self::open_store(cli)?;
        let not_initialized = || {
            Error::Storage(format!(
                "no pool in {}; run `zusd init` first",
                cli.data_dir.display()
            ))
        };
        let pool_config = store.load_config()?.ok_or_else(not_initialized)?;
        let pool = store.load_pool()?.ok_or_else(not_initialized)?;
        Self::assemble(store, pool_config, pool)
    }

    fn open_store(cli: &CliConfig) -> Result<PoolStore<FileStore>> {
        cli.validate()
            .map_err(|e| Error::InvalidParameter {
                name: "data_dir".into(),
                reason: e.to_string(),
            })?;
        Ok(PoolStore::new(FileStore::new(&cli.data_dir)?))
    }

    fn assemble(store: PoolStore<FileStore>, pool_config: PoolConfig, pool: StabilityPool) -> Result<Self> {
        let mocks = InMemoryCollaborators::new();
        mocks.stablecoin.fund_pool(pool.total_pooled())?;
        mocks.custody.receive_liquidated(pool.total_collateral())?;

        let event_base = store.next_event_sequence()?;
        let service = StabilityPoolService::with_pool(pool_config, pool, mocks.bundle())?;
        debug!(event_base, "workspace opened");

        Ok(Self {
            store,
            service,
            mocks,
            event_base,
        })
    }

    /// The service operating on the loaded ledger
    pub fn service(&self) -> &StabilityPoolService {
        &self.service
    }

    /// Account allowed to offset debt
    pub fn liquidation_manager(&self) -> AccountId {
        self.service.config().liquidation_manager
    }

    /// Credit `amount` ZUSD to `account` so it can be deposited
    pub fn fund(&self, account: &AccountId, amount: TokenAmount) -> Result<()> {
        self.mocks.stablecoin.mint(account, amount)
    }

    /// Persist the ledger and the events produced since opening
    pub fn commit(&self) -> Result<Hash> {
        let mut records = self.service.history()?;
        for record in &mut records {
            record.sequence += self.event_base;
        }
        self.store.append_events(&records)?;
        let hash = self.store.save_pool(&self.service.snapshot()?)?;
        debug!(events = records.len(), state_hash = %hash, "workspace committed");
        Ok(hash)
    }

    /// Full stored event history
    pub fn events(&self) -> Result<Vec<crate::events::EventRecord>> {
        self.store.load_events()
    }
}

/// Parse an account given as `0x` hex or as a label
pub fn parse_account(s: &str) -> Result<AccountId> {
    s.parse()
}

/// Parse a decimal rate such as `0.8` into a fixed-point fraction
pub fn parse_rate(s: &str) -> Result<FixedPoint> {
    let rate = FixedPoint::from_raw(parse_units(s)?);
    if !rate.is_fraction() {
        return Err(Error::InvalidKickbackRate(rate.raw()));
    }
    Ok(rate)
}
