//! Ledger persistence.
//!
//! The ledger is stored as one bincode snapshot together with its SHA-256
//! state hash. Loading recomputes the hash and refuses a snapshot that does
//! not match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::PoolConfig;
use crate::error::{Error, Result};
use crate::events::EventRecord;
use crate::pool::StabilityPool;
use crate::storage::backend::{make_key, prefixes, StorageBackend, TypedStore};
use crate::utils::crypto::Hash;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// A saved ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Format version
    pub version: u32,
    /// Time the snapshot was taken
    pub saved_at: DateTime<Utc>,
    /// Hash of the ledger at save time
    pub state_hash: Hash,
    /// The ledger
    pub pool: StabilityPool,
}

impl PoolSnapshot {
    /// Capture `pool`
    pub fn capture(pool: &StabilityPool) -> Result<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            state_hash: pool.state_hash()?,
            pool: pool.clone(),
        })
    }

    /// Check version and hash
    pub fn verify(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::Storage(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let actual = self.pool.state_hash()?;
        if actual != self.state_hash {
            return Err(Error::Storage(format!(
                "state hash mismatch: stored {}, computed {}",
                self.state_hash, actual
            )));
        }
        Ok(())
    }
}

/// Persistence for one pool: configuration, ledger snapshot and event history
pub struct PoolStore<B: StorageBackend> {
    store: TypedStore<B>,
}

impl<B: StorageBackend> PoolStore<B> {
    /// Create on top of `backend`
    pub fn new(backend: B) -> Self {
        Self {
            store: TypedStore::new(backend),
        }
    }

    fn pool_key() -> Vec<u8> {
        make_key(prefixes::POOL, b"main")
    }

    fn config_key() -> Vec<u8> {
        make_key(prefixes::CONFIG, b"pool")
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER
    // ═══════════════════════════════════════════════════════════════════════════

    /// Save the ledger and flush
    pub fn save_pool(&self, pool: &StabilityPool) -> Result<Hash> {
        let snapshot = PoolSnapshot::capture(pool)?;
        self.store.set(&Self::pool_key(), &snapshot)?;
        self.store.flush()?;
        info!(state_hash = %snapshot.state_hash, "pool saved");
        Ok(snapshot.state_hash)
    }

    /// Load the ledger, verifying its hash
    pub fn load_pool(&self) -> Result<Option<StabilityPool>> {
        match self.store.get::<PoolSnapshot>(&Self::pool_key())? {
            Some(snapshot) => {
                snapshot.verify()?;
                debug!(state_hash = %snapshot.state_hash, saved_at = %snapshot.saved_at, "pool loaded");
                Ok(Some(snapshot.pool))
            }
            None => Ok(None),
        }
    }

    /// Check whether a ledger has been saved
    pub fn has_pool(&self) -> Result<bool> {
        self.store.exists(&Self::pool_key())
    }

    /// Store a raw snapshot without recomputing its hash
    pub fn save_snapshot(&self, snapshot: &PoolSnapshot) -> Result<()> {
        self.store.set(&Self::pool_key(), snapshot)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Save the pool configuration
    pub fn save_config(&self, config: &PoolConfig) -> Result<()> {
        config.validate()?;
        self.store.set(&Self::config_key(), config)
    }

    /// Load the pool configuration
    pub fn load_config(&self) -> Result<Option<PoolConfig>> {
        self.store.get(&Self::config_key())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Append events to the stored history
    pub fn append_events(&self, records: &[EventRecord]) -> Result<()> {
        for record in records {
            let key = make_key(prefixes::EVENT, &record.sequence.to_be_bytes());
            self.store.set(&key, record)?;
        }
        Ok(())
    }

    /// Stored history, oldest first
    pub fn load_events(&self) -> Result<Vec<EventRecord>> {
        let keys = self.store.list_prefix(prefixes::EVENT)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.store.get::<EventRecord>(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Sequence number to continue the history from
    pub fn next_event_sequence(&self) -> Result<u64> {
        Ok(self
            .load_events()?
            .last()
            .map(|r| r.sequence + 1)
            .unwrap_or(0))
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
