//! Log-structured backend
//!
//! Every mutation is appended to `data.log`; on open the log is replayed into
//! an in-memory index holding the latest value for each key.
//!
//! ```text
//! {path}/
//!   └── data.log
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{HubError, Result};

use super::log::{self, LogWriter, Operation};
use super::{EngineKind, EngineOptions, KvEngine};

/// Append-only log engine with an in-memory index
///
/// Writers serialize on the `log` mutex and update the index while still
/// holding it, so the index always reflects log order.
pub struct LogDb {
    path: PathBuf,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<LogWriter>,
    closed: AtomicBool,
}

impl LogDb {
    const DATA_FILENAME: &'static str = "data.log";

    /// Open or create a logdb at `path`
    pub fn open(path: &Path, options: &EngineOptions) -> Result<Self> {
        fs::create_dir_all(path)?;
        let log_path = path.join(Self::DATA_FILENAME);

        let replayed = log::replay(&log_path)?;
        let mut index = BTreeMap::new();
        for record in &replayed.records {
            match &record.op {
                Operation::Put { key, value } => {
                    index.insert(key.clone(), value.clone());
                }
                Operation::Delete { key } => {
                    index.remove(key);
                }
            }
        }

        let writer = LogWriter::open(&log_path, options.sync_strategy, replayed.next_seq())?;

        tracing::debug!(
            path = %path.display(),
            records = replayed.records.len(),
            keys = index.len(),
            "logdb opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            index: RwLock::new(index),
            log: Mutex::new(writer),
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

impl KvEngine for LogDb {
    fn kind(&self) -> EngineKind {
        EngineKind::LogDb
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.index.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        self.ensure_open()?;

        log.append(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.index.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        self.ensure_open()?;

        // Nothing to record for a key that is already absent
        if !self.index.read().contains_key(key) {
            return Ok(());
        }

        log.append(Operation::Delete { key: key.to_vec() })?;
        self.index.write().remove(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }

    fn sync(&self) -> Result<()> {
        let mut log = self.log.lock();
        self.ensure_open()?;
        log.sync()
    }

    fn close(&self) -> Result<()> {
        let mut log = self.log.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log.sync()
    }
}
