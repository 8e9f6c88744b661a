//! Engine Module
//!
//! The uniform capability interface every storage backend implements, the
//! backends themselves, and the dispatcher that picks one by identifier.
//!
//! ## Backends
//! - `memdb`: ephemeral BTreeMap, nothing persisted besides the directory
//! - `logdb`: append-only data log replayed into an in-memory index
//! - `lsmdb`: WAL + memtable + immutable sorted segment files
//!
//! ## Handle Lifecycle
//! ```text
//!   open(path) ──► EngineHandle (Arc<dyn KvEngine>) ──► close()
//!                        │                                 │
//!                        └── get / put / delete / sync     └── later ops: Closed
//! ```

mod kind;
mod log;
mod logdb;
mod lsmdb;
mod memdb;

use std::path::Path;
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::Result;

pub use kind::{open, open_with, Dispatcher, EngineKind, EngineOpener};
pub use log::{replay, LogRecord, LogWriter, Operation, Replay, FRAME_HEADER_SIZE, MAX_RECORD_SIZE};
pub use logdb::LogDb;
pub use lsmdb::LsmDb;
pub use memdb::MemDb;

/// Shared handle to an open engine instance
pub type EngineHandle = Arc<dyn KvEngine>;

/// Handle-level operations every storage backend provides
///
/// Implementations are internally synchronized; every method takes `&self`.
pub trait KvEngine: Send + Sync {
    /// Which backend this handle belongs to
    fn kind(&self) -> EngineKind;

    /// Directory the handle is bound to
    fn path(&self) -> &Path;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Number of live keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force buffered state to disk
    fn sync(&self) -> Result<()>;

    /// Flush and release the handle. Idempotent; later operations fail
    /// with `HubError::Closed`.
    fn close(&self) -> Result<()>;
}

/// Tunables passed to every backend on open
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// How often log-based backends fsync
    pub sync_strategy: SyncStrategy,

    /// lsmdb memtable flush threshold (bytes)
    pub memtable_size_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 4 * 1024 * 1024,
        }
    }
}
