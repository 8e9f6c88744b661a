//! Configuration for KvHub
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::engine::EngineOptions;

/// Main configuration for a KvHub registry
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Storage root. Every immediate subdirectory is one database:
    ///   {storage_dir}/
    ///     ├── users/       (engine-specific contents)
    ///     └── sessions/
    pub storage_dir: PathBuf,

    /// Engine identifier applied to every database (case-insensitive)
    pub engine: String,

    // -------------------------------------------------------------------------
    // Engine Tunables
    // -------------------------------------------------------------------------
    /// Sync strategy: how often log-based engines fsync
    pub sync_strategy: SyncStrategy,

    /// Max size of the lsmdb memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Startup / Identity
    // -------------------------------------------------------------------------
    /// Worker threads used by the startup scan
    pub scan_workers: usize,

    /// Node id mixed into generated unique ids (0..=1023)
    pub node_id: u16,
}

/// Log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./kvhub_data"),
            engine: "logdb".to_string(),
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            scan_workers: 4,
            node_id: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Engine tunables derived from this config
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            sync_strategy: self.sync_strategy,
            memtable_size_limit: self.memtable_size_limit,
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the storage root
    pub fn storage_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = path.into();
        self
    }

    /// Set the engine identifier
    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.config.engine = engine.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the number of startup scan workers (at least one is used)
    pub fn scan_workers(mut self, workers: usize) -> Self {
        self.config.scan_workers = workers;
        self
    }

    /// Set the node id for the unique id generator
    pub fn node_id(mut self, node_id: u16) -> Self {
        self.config.node_id = node_id;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
