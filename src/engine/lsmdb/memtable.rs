//! MemTable
//!
//! BTreeMap-based write buffer with an approximate byte size used as the
//! flush trigger.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Entry stored in the MemTable (and returned by segment lookups)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    fn weight(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }
}

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, MemTableEntry>>,
    size: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get the entry for a key (value or tombstone)
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Insert a value, returning the new approximate size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        self.insert(key, MemTableEntry::Value(value))
    }

    /// Insert a tombstone, returning the new approximate size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        self.insert(key, MemTableEntry::Tombstone)
    }

    fn insert(&self, key: Vec<u8>, entry: MemTableEntry) -> usize {
        // size is only written under the data write lock
        let mut data = self.data.write();
        let key_len = key.len();
        let weight = entry.weight();
        let current = self.size.load(Ordering::Relaxed);

        let next = match data.insert(key, entry) {
            // Replaced key: counted once, only the value weight changes
            Some(old) => current.saturating_sub(old.weight()) + weight,
            None => current + key_len + weight,
        };
        self.size.store(next, Ordering::Relaxed);
        next
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Sorted copy of every entry (for flush and key counting)
    pub fn snapshot(&self) -> Vec<(Vec<u8>, MemTableEntry)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop every entry (after a successful flush)
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::Relaxed);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
