//! In-memory backend
//!
//! Keeps everything in a BTreeMap. Only the database directory is created on
//! disk, so the database is rediscovered by the startup scan (empty).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{HubError, Result};

use super::{EngineKind, EngineOptions, KvEngine};

/// Ephemeral engine backed by a BTreeMap
pub struct MemDb {
    path: PathBuf,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemDb {
    pub fn open(path: &Path, _options: &EngineOptions) -> Result<Self> {
        fs::create_dir_all(path)?;
        tracing::debug!(path = %path.display(), "memdb opened");

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::Closed(self.path.clone()));
        }
        Ok(())
    }
}

impl KvEngine for MemDb {
    fn kind(&self) -> EngineKind {
        EngineKind::MemDb
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.data.write().remove(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
