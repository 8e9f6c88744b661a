//! Unique ID Generator
//!
//! Snowflake-style 63-bit ids, unique for the lifetime of one generator.
//!
//! ## Layout
//! ```text
//! ┌───┬──────────────────────────────┬────────────┬──────────────┐
//! │ 0 │ millis since EPOCH_MS (41)   │ node (10)  │ sequence (12)│
//! └───┴──────────────────────────────┴────────────┴──────────────┘
//! ```
//!
//! ## Concurrency
//! All state lives in one `AtomicU64` stamp (`millis << 12 | sequence`).
//! Each call advances it with compare-and-swap to
//! `max(now << 12, last + 1)`: a full sequence rolls into the next
//! millisecond and a clock stepping backwards never repeats a stamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HubError, Result};

/// 2020-01-01T00:00:00Z in unix millis
pub const EPOCH_MS: u64 = 1_577_836_800_000;

const TIMESTAMP_BITS: u32 = 41;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Largest accepted node id
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;

/// Decoded fields of a generated id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Unix millis the id was minted in
    pub timestamp_ms: u64,
    pub node_id: u16,
    pub sequence: u16,
}

/// Process-wide unique id source, safe to share across threads
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    last_stamp: AtomicU64,
}

impl IdGenerator {
    /// Create a generator for `node_id` (0..=1023)
    pub fn new(node_id: u16) -> Result<Self> {
        if node_id > MAX_NODE_ID {
            return Err(HubError::Config(format!(
                "node id {} out of range 0..={}",
                node_id, MAX_NODE_ID
            )));
        }

        Ok(Self {
            node_id,
            last_stamp: AtomicU64::new(0),
        })
    }

    /// Next unique id as a non-negative 64-bit integer
    pub fn next_int(&self) -> i64 {
        let now = current_millis() << SEQUENCE_BITS;
        let advance = |last: u64| now.max(last + 1);

        let prev = match self
            .last_stamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last)))
        {
            Ok(prev) | Err(prev) => prev,
        };
        let stamp = advance(prev);

        let millis = (stamp >> SEQUENCE_BITS) & TIMESTAMP_MASK;
        let sequence = stamp & SEQUENCE_MASK;
        let id = (millis << (NODE_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | sequence;

        id as i64
    }

    /// Next unique id rendered as a decimal string
    pub fn next_string(&self) -> String {
        self.next_int().to_string()
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    /// Split an id back into its fields
    pub fn decompose(id: i64) -> IdParts {
        let id = id as u64;
        IdParts {
            timestamp_ms: (id >> (NODE_BITS + SEQUENCE_BITS)) + EPOCH_MS,
            node_id: ((id >> SEQUENCE_BITS) & MAX_NODE_ID as u64) as u16,
            sequence: (id & SEQUENCE_MASK) as u16,
        }
    }
}

/// Millis since `EPOCH_MS` (0 if the clock reads earlier)
fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        .saturating_sub(EPOCH_MS)
}
