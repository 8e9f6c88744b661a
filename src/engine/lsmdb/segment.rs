//! Segments
//!
//! Immutable sorted files produced by memtable flushes.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "KVHS" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   DataCRC: u32                                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! Segments are written to `segment_NNNNNN.sst.tmp` and renamed into place
//! once complete, so a crash mid-flush never leaves a visible half segment.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{HubError, Result};

use super::memtable::MemTableEntry;

const MAGIC: &[u8; 4] = b"KVHS";
const VERSION: u16 = 1;
const HEADER_SIZE: u64 = 14;
const FOOTER_SIZE: u64 = 4;
const TOMBSTONE_MARKER: u32 = u32::MAX;

// =============================================================================
// Builder
// =============================================================================

/// Writes sorted entries to a new segment file
pub struct SegmentBuilder {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    data_hasher: crc32fast::Hasher,
}

impl SegmentBuilder {
    pub fn new(path: &Path) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?; // entry count, patched in finish

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer,
            entry_count: 0,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Add an entry (must be called in sorted key order)
    pub fn add(&mut self, key: &[u8], entry: &MemTableEntry) -> Result<()> {
        let val_len = match entry {
            MemTableEntry::Value(v) => v.len() as u32,
            MemTableEntry::Tombstone => TOMBSTONE_MARKER,
        };
        let key_len_bytes = (key.len() as u32).to_le_bytes();
        let val_len_bytes = val_len.to_le_bytes();

        for part in [&key_len_bytes[..], &val_len_bytes[..], key] {
            self.writer.write_all(part)?;
            self.data_hasher.update(part);
        }
        if let MemTableEntry::Value(v) = entry {
            self.writer.write_all(v)?;
            self.data_hasher.update(v);
        }

        self.entry_count += 1;
        Ok(())
    }

    /// Write the footer, patch the header and move the file into place
    pub fn finish(self) -> Result<u64> {
        let Self {
            path,
            tmp_path,
            mut writer,
            entry_count,
            data_hasher,
        } = self;

        writer.write_all(&data_hasher.finalize().to_le_bytes())?;
        writer.seek(SeekFrom::Start(6))?;
        writer.write_all(&entry_count.to_le_bytes())?;
        writer.flush()?;

        let file = writer.into_inner().map_err(|e| HubError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        Ok(entry_count)
    }
}

// =============================================================================
// Reader
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Slot {
    Value { offset: u64, len: u32 },
    Tombstone,
}

/// Open segment with its key index in memory; values are read on demand
pub struct SegmentReader {
    file: Mutex<File>,
    index: BTreeMap<Vec<u8>, Slot>,
}

impl SegmentReader {
    /// Open a segment, verifying header, entry count and data checksum
    pub fn open(path: &Path) -> Result<Self> {
        let corrupt = |what: &str| HubError::Corruption(format!("{}: {}", path.display(), what));

        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt("segment shorter than header and footer"));
        }

        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(corrupt("bad segment magic"));
        }
        if u16::from_le_bytes([header[4], header[5]]) != VERSION {
            return Err(corrupt("unsupported segment version"));
        }
        let expected_count = le_u64(&header[6..14]);

        let data_end = file_size - FOOTER_SIZE;
        let mut hasher = crc32fast::Hasher::new();
        let mut index = BTreeMap::new();
        let mut pos = HEADER_SIZE;

        while pos < data_end {
            if data_end - pos < 8 {
                return Err(corrupt("truncated entry header"));
            }
            let mut lens = [0u8; 8];
            reader.read_exact(&mut lens)?;
            hasher.update(&lens);
            let key_len = le_u32(&lens[0..4]) as u64;
            let val_len = le_u32(&lens[4..8]);
            pos += 8;

            let value_bytes = if val_len == TOMBSTONE_MARKER { 0 } else { val_len as u64 };
            if data_end - pos < key_len + value_bytes {
                return Err(corrupt("entry runs past data block"));
            }

            let mut key = vec![0u8; key_len as usize];
            reader.read_exact(&mut key)?;
            hasher.update(&key);
            pos += key_len;

            let slot = if val_len == TOMBSTONE_MARKER {
                Slot::Tombstone
            } else {
                let mut value = vec![0u8; val_len as usize];
                reader.read_exact(&mut value)?;
                hasher.update(&value);
                let slot = Slot::Value {
                    offset: pos,
                    len: val_len,
                };
                pos += value_bytes;
                slot
            };
            index.insert(key, slot);
        }

        let mut footer = [0u8; FOOTER_SIZE as usize];
        reader.read_exact(&mut footer)?;
        if hasher.finalize() != u32::from_le_bytes(footer) {
            return Err(corrupt("data checksum mismatch"));
        }
        if index.len() as u64 != expected_count {
            return Err(corrupt("entry count does not match header"));
        }

        Ok(Self {
            file: Mutex::new(reader.into_inner()),
            index,
        })
    }

    /// Look up a key: `None` when this segment has no entry for it
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let slot = match self.index.get(key) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        match slot {
            Slot::Tombstone => Ok(Some(MemTableEntry::Tombstone)),
            Slot::Value { offset, len } => {
                let mut value = vec![0u8; len as usize];
                let mut file = self.file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut value)?;
                Ok(Some(MemTableEntry::Value(value)))
            }
        }
    }

    /// Every key in this segment with whether it is live (not a tombstone)
    pub fn keys(&self) -> impl Iterator<Item = (&Vec<u8>, bool)> {
        self.index
            .iter()
            .map(|(k, slot)| (k, matches!(slot, Slot::Value { .. })))
    }
}

// =============================================================================
// Segment Set
// =============================================================================

/// Every segment of one database, newest first
pub struct SegmentSet {
    dir: PathBuf,
    readers: RwLock<Vec<Arc<SegmentReader>>>,
    next_id: AtomicU64,
}

impl SegmentSet {
    /// Open the segment directory, discovering existing segments
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }
            if file_path.extension().map_or(false, |ext| ext == "tmp") {
                tracing::warn!(path = %file_path.display(), "removing unfinished segment");
                fs::remove_file(&file_path)?;
                continue;
            }
            if let Some(id) = Self::parse_segment_id(&file_path) {
                ids.push(id);
            }
        }

        // Newest (highest id) first
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut readers = Vec::with_capacity(ids.len());
        for id in &ids {
            readers.push(Arc::new(SegmentReader::open(&Self::segment_path(dir, *id))?));
        }

        let next_id = ids.first().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            dir: dir.to_path_buf(),
            readers: RwLock::new(readers),
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Write sorted entries to a new segment and make it visible to readers
    pub fn flush(&self, entries: &[(Vec<u8>, MemTableEntry)]) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = Self::segment_path(&self.dir, id);

        let mut builder = SegmentBuilder::new(&path)?;
        for (key, entry) in entries {
            builder.add(key, entry)?;
        }
        let count = builder.finish()?;

        let reader = SegmentReader::open(&path)?;
        self.readers.write().insert(0, Arc::new(reader));

        tracing::debug!(segment = id, entries = count, "flushed memtable to segment");
        Ok(id)
    }

    /// Search segments newest → oldest
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let readers = self.snapshot();
        for reader in readers.iter() {
            if let Some(entry) = reader.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Readers newest first, detached from the lock
    pub fn snapshot(&self) -> Vec<Arc<SegmentReader>> {
        self.readers.read().clone()
    }

    pub fn count(&self) -> usize {
        self.readers.read().len()
    }

    fn segment_path(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("segment_{:06}.sst", id))
    }

    /// "segment_000042.sst" → Some(42)
    fn parse_segment_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let stem = path.file_stem()?.to_string_lossy();
        stem.strip_prefix("segment_")?.parse().ok()
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
