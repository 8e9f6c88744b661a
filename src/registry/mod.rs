//! Database Registry
//!
//! Maps logical database names to open engine handles.
//!
//! ## Responsibilities
//! - Get-or-open: open a database on first access, cache the handle
//! - At most one open handle per name for the life of the registry
//! - Warm up from disk at startup (see `scan`)
//!
//! ## Open Policy
//! Callers that miss the cache serialize on a per-name open token, so an
//! engine is opened once per name while opens of different names proceed in
//! parallel. No map lock is held across an engine open. The final insert goes
//! through the map's entry API; a handle that finds the slot already taken
//! (for example by `adopt` during an open) is closed and discarded in favour
//! of the retained one.

mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::{Dispatcher, EngineHandle, EngineOpener};
use crate::error::{HubError, Result};

pub use scan::ScanReport;

/// Concurrency-safe name → engine handle map
pub struct Registry {
    /// Storage root; database `n` lives in `{storage_dir}/n`
    storage_dir: PathBuf,

    /// Opens handles for missing databases
    opener: Arc<dyn EngineOpener>,

    /// Retained handles. Entries are never replaced or removed.
    databases: DashMap<String, EngineHandle>,

    /// Per-name open tokens, held only by callers that missed `databases`.
    /// The last holder removes the token.
    opening: DashMap<String, Arc<Mutex<()>>>,

    /// Worker threads used by `load_existing`
    scan_workers: usize,
}

impl Registry {
    /// Create an empty registry using the engine named in `config`
    ///
    /// Fails with `UnsupportedEngine` if the identifier is unknown.
    pub fn new(config: &Config) -> Result<Self> {
        let dispatcher = Dispatcher::new(&config.engine, config.engine_options())?;

        Ok(Self::with_opener(&config.storage_dir, Arc::new(dispatcher))
            .with_scan_workers(config.scan_workers))
    }

    /// Create an empty registry around an arbitrary opener
    pub fn with_opener(storage_dir: impl Into<PathBuf>, opener: Arc<dyn EngineOpener>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            opener,
            databases: DashMap::new(),
            opening: DashMap::new(),
            scan_workers: 1,
        }
    }

    /// Set the number of startup scan workers (at least one is used)
    pub fn with_scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = workers.max(1);
        self
    }

    /// Create the registry and run the startup scan
    pub fn open(config: &Config) -> Result<(Self, ScanReport)> {
        let registry = Self::new(config)?;
        let report = registry.load_existing()?;
        Ok((registry, report))
    }

    /// Return the handle for `name`, opening the database on first access
    ///
    /// On open failure nothing is cached and the error is returned as
    /// `OpenFailure`; a later call tries again.
    pub fn get_or_open(&self, name: &str) -> Result<EngineHandle> {
        validate_name(name)?;

        if let Some(handle) = self.get(name) {
            return Ok(handle);
        }

        let token = Arc::clone(self.opening.entry(name.to_string()).or_default().value());
        let result = {
            let _guard = token.lock();
            self.open_exclusive(name)
        };

        // Tokens are only cloned under the map's shard lock, so a count of
        // one means no other caller holds or is waiting on this token.
        drop(token);
        self.opening.remove_if(name, |_, t| Arc::strong_count(t) == 1);

        result
    }

    /// Open `name` while holding its open token
    fn open_exclusive(&self, name: &str) -> Result<EngineHandle> {
        // Another caller may have finished the open while we waited
        if let Some(handle) = self.get(name) {
            return Ok(handle);
        }

        let path = self.storage_dir.join(name);
        let handle = self.opener.open(&path).map_err(|source| {
            tracing::warn!(
                name = %name,
                path = %path.display(),
                error = %source,
                "failed to open database"
            );
            HubError::OpenFailure {
                name: name.to_string(),
                path: path.clone(),
                source: Box::new(source),
            }
        })?;

        Ok(self.retain(name, handle))
    }

    /// Register a handle opened outside the registry
    ///
    /// If `name` is already open, `handle` is closed and the retained handle
    /// is returned instead.
    pub fn adopt(&self, name: &str, handle: EngineHandle) -> Result<EngineHandle> {
        validate_name(name)?;
        Ok(self.retain(name, handle))
    }

    /// Store a freshly opened handle unless one is already retained
    fn retain(&self, name: &str, handle: EngineHandle) -> EngineHandle {
        match self.databases.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                let winner = Arc::clone(existing.get());
                drop(existing);

                tracing::warn!(name = %name, "database already open, closing duplicate handle");
                if let Err(e) = handle.close() {
                    tracing::warn!(name = %name, error = %e, "failed to close duplicate handle");
                }
                winner
            }
            Entry::Vacant(slot) => {
                tracing::info!(
                    name = %name,
                    engine = self.opener.name(),
                    path = %handle.path().display(),
                    "database opened"
                );
                Arc::clone(slot.insert(handle).value())
            }
        }
    }

    /// The handle for `name` if it is already open
    pub fn get(&self, name: &str) -> Option<EngineHandle> {
        self.databases.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    /// Names of all open databases, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    /// Names with an open in progress
    pub fn pending_opens(&self) -> usize {
        self.opening.len()
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Name of the engine every database is opened with
    pub fn engine_name(&self) -> &str {
        self.opener.name()
    }

    /// Sync every open handle. Entries stay open.
    ///
    /// Every handle is attempted; the first error is returned.
    pub fn sync_all(&self) -> Result<()> {
        let handles: Vec<(String, EngineHandle)> = self
            .databases
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut first_error = None;
        for (name, handle) in handles {
            if let Err(e) = handle.sync() {
                tracing::warn!(name = %name, error = %e, "failed to sync database");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A database name is a single, non-empty path component
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c| c == '/' || c == '\\' || c == '\0');

    if invalid {
        return Err(HubError::InvalidName(name.to_string()));
    }
    Ok(())
}
