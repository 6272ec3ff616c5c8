//! Storage backend implementations.
//!
//! - InMemoryStore: ephemeral storage for tests
//! - FileStore: JSON file with hex-encoded keys and values

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Key type for storage operations
pub type StorageKey = Vec<u8>;

/// Value type for storage operations
pub type StorageValue = Vec<u8>;

/// Trait for storage backends
pub trait StorageBackend: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>>;

    /// Set a value for a key
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// List all keys with a given prefix, in key order
    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>>;

    /// Flush any pending writes to persistent storage
    fn flush(&self) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        let data = self.data.read().map_err(|_| Error::Lock)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Error::Lock)?;
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut data = self.data.write().map_err(|_| Error::Lock)?;
        Ok(data.remove(key).is_some())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let data = self.data.read().map_err(|_| Error::Lock)?;
        Ok(data.contains_key(key))
    }

    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        let data = self.data.read().map_err(|_| Error::Lock)?;
        Ok(data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE-BASED STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// File-based storage backend using JSON
#[derive(Debug)]
pub struct FileStore {
    /// Directory holding `data.json`
    base_path: PathBuf,
    cache: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    dirty: RwLock<bool>,
}

impl FileStore {
    /// Open the store in `path`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                Error::Storage(format!("failed to create {}: {}", base_path.display(), e))
            })?;
        }

        let store = Self {
            base_path,
            cache: RwLock::new(BTreeMap::new()),
            dirty: RwLock::new(false),
        };
        store.load_from_disk()?;

        Ok(store)
    }

    /// Path of the data file
    pub fn data_file_path(&self) -> PathBuf {
        self.base_path.join("data.json")
    }

    fn load_from_disk(&self) -> Result<()> {
        let path = self.data_file_path();
        if !path.exists() {
            return Ok(());
        }

        let file = File::open(&path)
            .map_err(|e| Error::Storage(format!("failed to open {}: {}", path.display(), e)))?;
        let data: BTreeMap<String, String> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Storage(format!("failed to parse {}: {}", path.display(), e)))?;

        let mut cache = self.cache.write().map_err(|_| Error::Lock)?;
        for (key_hex, value_hex) in data {
            let key = hex::decode(&key_hex)
                .map_err(|e| Error::Storage(format!("invalid key in storage: {}", e)))?;
            let value = hex::decode(&value_hex)
                .map_err(|e| Error::Storage(format!("invalid value in storage: {}", e)))?;
            cache.insert(key, value);
        }

        Ok(())
    }

    fn save_to_disk(&self) -> Result<()> {
        let cache = self.cache.read().map_err(|_| Error::Lock)?;
        let data: BTreeMap<String, String> = cache
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();

        let path = self.data_file_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("failed to open {}: {}", path.display(), e)))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &data)
            .map_err(|e| Error::Storage(format!("failed to write {}: {}", path.display(), e)))?;

        let mut dirty = self.dirty.write().map_err(|_| Error::Lock)?;
        *dirty = false;

        Ok(())
    }

    fn mark_dirty(&self) -> Result<()> {
        let mut dirty = self.dirty.write().map_err(|_| Error::Lock)?;
        *dirty = true;
        Ok(())
    }
}

impl StorageBackend for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        let cache = self.cache.read().map_err(|_| Error::Lock)?;
        Ok(cache.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| Error::Lock)?;
        cache.insert(key.to_vec(), value.to_vec());
        drop(cache);
        self.mark_dirty()
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut cache = self.cache.write().map_err(|_| Error::Lock)?;
        let existed = cache.remove(key).is_some();
        drop(cache);
        if existed {
            self.mark_dirty()?;
        }
        Ok(existed)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let cache = self.cache.read().map_err(|_| Error::Lock)?;
        Ok(cache.contains_key(key))
    }

    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        let cache = self.cache.read().map_err(|_| Error::Lock)?;
        Ok(cache
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn flush(&self) -> Result<()> {
        let dirty = *self.dirty.read().map_err(|_| Error::Lock)?;
        if dirty {
            self.save_to_disk()?;
        }
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPED STORE WRAPPER
// ═══════════════════════════════════════════════════════════════════════════════

/// Type-safe wrapper around a storage backend, values encoded with bincode
pub struct TypedStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> TypedStore<B> {
    /// Create a new typed store
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.backend.get(key)? {
            Some(data) => {
                let value = bincode::deserialize(&data).map_err(|e| {
                    Error::Deserialization(format!("failed to deserialize value: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a typed value
    pub fn set<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let data = bincode::serialize(value)
            .map_err(|e| Error::Serialization(format!("failed to serialize value: {}", e)))?;
        self.backend.set(key, &data)
    }

    /// Delete a value
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.backend.delete(key)
    }

    /// Check if a key exists
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.backend.exists(key)
    }

    /// List keys with prefix
    pub fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        self.backend.list_prefix(prefix)
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Get the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEY PREFIXES
// ═══════════════════════════════════════════════════════════════════════════════

/// Key prefixes for different data types
pub mod prefixes {
    /// Pool configuration
    pub const CONFIG: &[u8] = b"cfg:";
    /// Ledger snapshot
    pub const POOL: &[u8] = b"sp:";
    /// Event history, keyed by big-endian sequence number
    pub const EVENT: &[u8] = b"evt:";
}

/// Create a key with a prefix
pub fn make_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(prefix.len() + key.len());
    result.extend_from_slice(prefix);
    result.extend_from_slice(key);
    result
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
