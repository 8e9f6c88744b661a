//! Append-only record log
//!
//! Shared by `logdb` (as its data file) and `lsmdb` (as its write-ahead log).
//!
//! ## Frame Format
//! ```text
//! ┌────────────────┬─────────┬─────────────────┬──────────────────────────┐
//! │ HeaderCRC (4)  │ Len (4) │ PayloadCRC (4)  │ bincode(LogRecord) (Len) │
//! └────────────────┴─────────┴─────────────────┴──────────────────────────┘
//! ```
//! HeaderCRC covers `Len ‖ PayloadCRC`, so a damaged length is caught before
//! it is used. All integers are little-endian.
//!
//! ## Recovery Rules
//! - fewer than `FRAME_HEADER_SIZE` bytes left: torn tail, truncated
//! - verified header, payload cut short by end of file: torn tail, truncated
//! - anything else that does not verify: `Corruption`, file left untouched

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::SyncStrategy;
use crate::error::{HubError, Result};

/// HeaderCRC (4) + payload length (4) + PayloadCRC (4)
pub const FRAME_HEADER_SIZE: usize = 12;

/// Largest payload a frame may carry (64 MiB)
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Mutations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

/// A single record in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Sequence number, increasing within one log
    pub seq: u64,

    /// Unix millis when the record was created
    pub timestamp_ms: u64,

    /// The mutation
    pub op: Operation,
}

impl LogRecord {
    pub fn new(seq: u64, op: Operation) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            seq,
            timestamp_ms,
            op,
        }
    }

    /// Encode into a complete frame (header + payload)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        if payload.len() > MAX_RECORD_SIZE {
            return Err(HubError::Serialization(format!(
                "record of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_RECORD_SIZE
            )));
        }

        let len_bytes = (payload.len() as u32).to_le_bytes();
        let payload_crc = crc32fast::hash(&payload).to_le_bytes();

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header_crc(&len_bytes, &payload_crc).to_le_bytes());
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&payload_crc);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

fn header_crc(len_bytes: &[u8], payload_crc: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len_bytes);
    hasher.update(payload_crc);
    hasher.finalize()
}

// =============================================================================
// Writer
// =============================================================================

/// Appends records to a log file
///
/// `len` is the length of the log up to the last complete frame. A failed
/// append cuts the file back to it, so a partial frame never sits in front
/// of later records.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    len: u64,
    next_seq: u64,
    sync_strategy: SyncStrategy,
    unsynced: usize,
    /// Set when cutting back after a failed append also failed
    needs_trim: bool,
}

impl LogWriter {
    /// Open or create a log for appending. `next_seq` continues the sequence
    /// found by `replay`.
    pub fn open(path: &Path, sync_strategy: SyncStrategy, next_seq: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            next_seq,
            sync_strategy,
            unsynced: 0,
            needs_trim: false,
        })
    }

    /// Append one operation, returning its sequence number
    pub fn append(&mut self, op: Operation) -> Result<u64> {
        let seq = self.next_seq;
        let frame = LogRecord::new(seq, op).encode()?;

        self.write_frame(&frame, |file, bytes| file.write_all(bytes))?;
        self.next_seq += 1;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if due {
            self.sync()?;
        }

        Ok(seq)
    }

    /// Run `write` for one frame; on error drop whatever part of it landed
    fn write_frame<F>(&mut self, frame: &[u8], write: F) -> Result<()>
    where
        F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        if self.needs_trim {
            self.trim()?;
        }

        if let Err(e) = write(&mut self.file, frame) {
            if let Err(trim_err) = self.trim() {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %trim_err,
                    "failed to drop partial log frame"
                );
                self.needs_trim = true;
            }
            return Err(e.into());
        }

        self.len += frame.len() as u64;
        Ok(())
    }

    /// Cut the file back to the last complete frame
    fn trim(&mut self) -> Result<()> {
        self.file.set_len(self.len)?;
        self.needs_trim = false;
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Drop every record (the caller has made them durable elsewhere)
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        self.needs_trim = false;
        self.unsynced = 0;
        Ok(())
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Bytes of complete frames in the log
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Replay
// =============================================================================

/// Outcome of replaying a log file
#[derive(Debug, Default)]
pub struct Replay {
    /// Every intact record, in file order
    pub records: Vec<LogRecord>,

    /// Bytes cut from a torn tail (0 for a clean log)
    pub truncated_bytes: u64,
}

impl Replay {
    /// Sequence number the next appended record should carry
    pub fn next_seq(&self) -> u64 {
        self.records.last().map(|r| r.seq + 1).unwrap_or(1)
    }
}

/// Read every record of a log file
///
/// Only a torn tail is cut away on disk; every other damage is reported as
/// `HubError::Corruption` without modifying the file. A missing file replays
/// as empty.
pub fn replay(path: &Path) -> Result<Replay> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |offset: usize, what: &str| {
        HubError::Corruption(format!(
            "{}: {} in record at offset {}",
            path.display(),
            what,
            offset
        ))
    };

    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < FRAME_HEADER_SIZE {
            break;
        }

        let stored_header_crc = read_u32(&bytes, offset);
        let len_bytes = &bytes[offset + 4..offset + 8];
        let payload_crc_bytes = &bytes[offset + 8..offset + 12];
        if header_crc(len_bytes, payload_crc_bytes) != stored_header_crc {
            return Err(corrupt(offset, "header checksum mismatch"));
        }

        let len = read_u32(&bytes, offset + 4) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(corrupt(offset, "record length over limit"));
        }
        if remaining - FRAME_HEADER_SIZE < len {
            break;
        }

        let start = offset + FRAME_HEADER_SIZE;
        let payload = &bytes[start..start + len];
        if crc32fast::hash(payload) != read_u32(&bytes, offset + 8) {
            return Err(corrupt(offset, "payload checksum mismatch"));
        }

        let record: LogRecord = bincode::deserialize(payload)
            .map_err(|e| corrupt(offset, &format!("undecodable payload ({})", e)))?;

        records.push(record);
        offset = start + len;
    }

    let truncated_bytes = (bytes.len() - offset) as u64;
    if truncated_bytes > 0 {
        tracing::warn!(
            path = %path.display(),
            truncated_bytes,
            valid_len = offset,
            "truncating torn log tail"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset as u64)?;
        file.sync_all()?;
    }

    Ok(Replay {
        records,
        truncated_bytes,
    })
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}
