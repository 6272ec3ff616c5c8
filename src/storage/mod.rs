//! Storage module for persistent data management.
//!
//! ## Backends
//!
//! - **InMemoryStore**: ephemeral storage for testing
//! - **FileStore**: JSON file-based persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zusd::storage::{FileStore, PoolStore};
//!
//! let store = PoolStore::new(FileStore::new("./zusd-data")?);
//! store.save_pool(&pool)?;
//! let pool = store.load_pool()?;
//! ```

pub mod backend;
pub mod state;

pub use backend::*;
pub use state::*;
