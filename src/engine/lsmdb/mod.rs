//! LSM backend
//!
//! Coordinates a write-ahead log, a memtable and immutable segment files.
//!
//! ## Responsibilities
//! - Log every mutation before applying it
//! - Flush the memtable to a new segment when it outgrows its limit
//! - Replay and flush the WAL on open
//!
//! ```text
//! {path}/
//!   ├── wal.log
//!   └── segments/
//!         ├── segment_000001.sst
//!         └── segment_000002.sst
//! ```

mod memtable;
mod segment;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{HubError, Result};

use super::log::{self, LogWriter, Operation};
use super::{EngineKind, EngineOptions, KvEngine};

use memtable::{MemTable, MemTableEntry};
use segment::SegmentSet;

/// LSM storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/delete/flush): serialized by the `wal` mutex, which is
///   held across WAL append, memtable update and any triggered flush
/// - **Reads** (get): memtable read lock, then per-segment file locks
/// - **len**: takes the `wal` mutex so it sees no flush half done
///
/// A flush publishes the new segment before clearing the memtable, so a
/// concurrent reader always finds a key in one or the other.
pub struct LsmDb {
    path: PathBuf,
    memtable_size_limit: usize,
    wal: Mutex<LogWriter>,
    memtable: MemTable,
    segments: SegmentSet,
    closed: AtomicBool,
}

impl LsmDb {
    const WAL_FILENAME: &'static str = "wal.log";
    const SEGMENT_DIR: &'static str = "segments";

    /// Open or create an lsmdb at `path`
    ///
    /// On startup:
    /// 1. Create the directory layout
    /// 2. Discover existing segments
    /// 3. Replay the WAL into the memtable
    /// 4. Flush recovered entries and truncate the WAL
    pub fn open(path: &Path, options: &EngineOptions) -> Result<Self> {
        fs::create_dir_all(path)?;
        let wal_path = path.join(Self::WAL_FILENAME);

        let segments = SegmentSet::open(&path.join(Self::SEGMENT_DIR))?;
        let memtable = MemTable::new();

        let replayed = log::replay(&wal_path)?;
        for record in replayed.records.iter().cloned() {
            match record.op {
                Operation::Put { key, value } => {
                    memtable.put(key, value);
                }
                Operation::Delete { key } => {
                    memtable.delete(key);
                }
            }
        }

        let mut wal = LogWriter::open(&wal_path, options.sync_strategy, replayed.next_seq())?;

        // Recovered entries become durable in a segment before the WAL is cut
        if !memtable.is_empty() {
            tracing::info!(
                path = %path.display(),
                entries = memtable.entry_count(),
                "flushing recovered WAL entries"
            );
            segments.flush(&memtable.snapshot())?;
            memtable.clear();
            wal.truncate()?;
        }

        tracing::debug!(
            path = %path.display(),
            segments = segments.count(),
            "lsmdb opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            memtable_size_limit: options.memtable_size_limit,
            wal: Mutex::new(wal),
            memtable,
            segments,
            closed: AtomicBool::new(false),
        })
    }

    /// Force a memtable flush regardless of its size
    pub fn flush(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        self.ensure_open()?;
        self.flush_locked(&mut wal)
    }

    /// Number of segment files
    pub fn segment_count(&self) -> usize {
        self.segments.count()
    }

    /// Approximate memtable size in bytes
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Called with the WAL lock held
    fn flush_locked(&self, wal: &mut LogWriter) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.segments.flush(&self.memtable.snapshot())?;
        self.memtable.clear();
        wal.truncate()
    }

    fn apply(&self, op: Operation) -> Result<()> {
        let mut wal = self.wal.lock();
        self.ensure_open()?;

        wal.append(op.clone())?;
        let new_size = match op {
            Operation::Put { key, value } => self.memtable.put(key, value),
            Operation::Delete { key } => self.memtable.delete(key),
        };

        if new_size >= self.memtable_size_limit {
            self.flush_locked(&mut wal)?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::Closed(self.path.clone()));
        }
        Ok(())
    }
}

impl KvEngine for LsmDb {
    fn kind(&self) -> EngineKind {
        EngineKind::LsmDb
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Search order: memtable, then segments newest → oldest
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let entry = match self.memtable.get(key) {
            Some(entry) => Some(entry),
            None => self.segments.get(key)?,
        };

        Ok(match entry {
            Some(MemTableEntry::Value(value)) => Some(value),
            Some(MemTableEntry::Tombstone) | None => None,
        })
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply(Operation::Delete { key: key.to_vec() })
    }

    fn len(&self) -> usize {
        // Holding the WAL lock keeps flushes from moving entries between the
        // two snapshots
        let _wal = self.wal.lock();

        // Oldest first so newer entries overwrite older ones
        let mut live: BTreeMap<Vec<u8>, bool> = BTreeMap::new();
        for reader in self.segments.snapshot().iter().rev() {
            for (key, is_live) in reader.keys() {
                live.insert(key.clone(), is_live);
            }
        }
        for (key, entry) in self.memtable.snapshot() {
            live.insert(key, matches!(entry, MemTableEntry::Value(_)));
        }
        live.values().filter(|is_live| **is_live).count()
    }

    fn sync(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        self.ensure_open()?;
        wal.sync()
    }

    fn close(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush_locked(&mut wal)?;
        wal.sync()
    }
}
