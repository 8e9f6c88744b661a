//! Tests for the storage backends
//!
//! These tests verify:
//! - Basic get/put/delete on every backend
//! - Closed handles reject operations
//! - Persistence across reopen (logdb, lsmdb) and its absence (memdb)
//! - lsmdb flushes, segment reads, tombstones and WAL recovery
//! - Corruption detection

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use kvhub::config::SyncStrategy;
use kvhub::engine::{EngineKind, EngineOptions, KvEngine, LogDb, LsmDb};
use kvhub::HubError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn options_with_small_memtable() -> EngineOptions {
    EngineOptions {
        sync_strategy: SyncStrategy::EveryWrite,
        memtable_size_limit: 100, // Very small to trigger flushes
    }
}

fn segment_files(path: &Path) -> usize {
    fs::read_dir(path.join("segments"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .map_or(false, |ext| ext == "sst")
        })
        .count()
}

// =============================================================================
// Common Behaviour Tests
// =============================================================================

#[test]
fn test_put_get_delete_on_every_backend() {
    let temp = TempDir::new().unwrap();

    for kind in EngineKind::ALL {
        let db = kind
            .open(&temp.path().join(kind.as_str()), &EngineOptions::default())
            .unwrap();

        db.put(b"hello", b"world").unwrap();
        db.put(b"key", b"value1").unwrap();
        db.put(b"key", b"value2").unwrap();

        assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()), "{}", kind);
        assert_eq!(db.get(b"key").unwrap(), Some(b"value2".to_vec()), "{}", kind);
        assert_eq!(db.get(b"missing").unwrap(), None, "{}", kind);
        assert_eq!(db.len(), 2, "{}", kind);

        db.delete(b"hello").unwrap();
        db.delete(b"never-existed").unwrap();

        assert_eq!(db.get(b"hello").unwrap(), None, "{}", kind);
        assert_eq!(db.len(), 1, "{}", kind);
        assert!(!db.is_empty(), "{}", kind);
    }
}

#[test]
fn test_closed_handle_rejects_operations() {
    let temp = TempDir::new().unwrap();

    for kind in EngineKind::ALL {
        let db = kind
            .open(&temp.path().join(kind.as_str()), &EngineOptions::default())
            .unwrap();
        db.put(b"k", b"v").unwrap();

        db.close().unwrap();
        db.close().unwrap(); // idempotent

        assert!(matches!(db.get(b"k"), Err(HubError::Closed(_))), "{}", kind);
        assert!(matches!(db.put(b"k", b"v"), Err(HubError::Closed(_))), "{}", kind);
        assert!(matches!(db.delete(b"k"), Err(HubError::Closed(_))), "{}", kind);
        assert!(matches!(db.sync(), Err(HubError::Closed(_))), "{}", kind);
    }
}

#[test]
fn test_memdb_is_not_persisted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cache");

    {
        let db = EngineKind::MemDb.open(&path, &EngineOptions::default()).unwrap();
        db.put(b"k", b"v").unwrap();
    }

    let db = EngineKind::MemDb.open(&path, &EngineOptions::default()).unwrap();
    assert!(path.is_dir());
    assert!(db.is_empty());
}

// =============================================================================
// logdb Tests
// =============================================================================

#[test]
fn test_logdb_reopen_restores_latest_values() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("users");
    let options = EngineOptions {
        sync_strategy: SyncStrategy::EveryWrite,
        ..EngineOptions::default()
    };

    {
        let db = LogDb::open(&path, &options).unwrap();
        for i in 0..100 {
            db.put(format!("key{}", i).as_bytes(), b"old").unwrap();
        }
        for i in 0..100 {
            db.put(format!("key{}", i).as_bytes(), format!("new{}", i).as_bytes())
                .unwrap();
        }
        for i in 0..10 {
            db.delete(format!("key{}", i).as_bytes()).unwrap();
        }
    }

    let db = LogDb::open(&path, &options).unwrap();
    assert_eq!(db.len(), 90);
    assert_eq!(db.get(b"key5").unwrap(), None);
    assert_eq!(db.get(b"key50").unwrap(), Some(b"new50".to_vec()));
}

#[test]
fn test_logdb_torn_tail_is_dropped_on_open() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("users");

    {
        let db = LogDb::open(&path, &EngineOptions::default()).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.sync().unwrap();
    }

    // Simulate a crash halfway through the last record
    let log_path = path.join("data.log");
    let len = fs::metadata(&log_path).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&log_path).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let db = LogDb::open(&path, &EngineOptions::default()).unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"b").unwrap(), None);

    // New writes land after the truncated tail and survive another reopen
    db.put(b"c", b"3").unwrap();
    drop(db);
    let db = LogDb::open(&path, &EngineOptions::default()).unwrap();
    assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.len(), 2);
}

#[test]
fn test_logdb_damaged_length_fails_open_without_losing_data() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("users");

    {
        let db = LogDb::open(&path, &EngineOptions::default()).unwrap();
        for i in 0..10 {
            db.put(format!("key{}", i).as_bytes(), b"value").unwrap();
        }
        db.sync().unwrap();
    }

    let log_path = path.join("data.log");
    let original = fs::read(&log_path).unwrap();
    let mut damaged = original.clone();
    damaged[7] ^= 0x10;
    fs::write(&log_path, &damaged).unwrap();

    let result = LogDb::open(&path, &EngineOptions::default());
    assert!(matches!(result, Err(HubError::Corruption(_))));
    assert_eq!(fs::read(&log_path).unwrap().len(), original.len());

    // Repairing the byte brings every record back
    fs::write(&log_path, &original).unwrap();
    let db = LogDb::open(&path, &EngineOptions::default()).unwrap();
    assert_eq!(db.len(), 10);
}

// =============================================================================
// lsmdb Tests
// =============================================================================

#[test]
fn test_lsmdb_flushes_past_memtable_limit() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events");
    let db = LsmDb::open(&path, &options_with_small_memtable()).unwrap();

    for i in 0..50 {
        db.put(format!("key{:03}", i).as_bytes(), b"some value bytes").unwrap();
    }

    assert!(db.segment_count() > 0);
    assert_eq!(db.segment_count(), segment_files(&path));
    assert!(db.memtable_size() < 100);

    for i in 0..50 {
        assert_eq!(
            db.get(format!("key{:03}", i).as_bytes()).unwrap(),
            Some(b"some value bytes".to_vec())
        );
    }
    assert_eq!(db.len(), 50);
}

#[test]
fn test_lsmdb_newer_segment_shadows_older() {
    let temp = TempDir::new().unwrap();
    let db = LsmDb::open(&temp.path().join("events"), &EngineOptions::default()).unwrap();

    db.put(b"key", b"v1").unwrap();
    db.put(b"gone", b"x").unwrap();
    db.flush().unwrap();

    db.put(b"key", b"v2").unwrap();
    db.delete(b"gone").unwrap();
    db.flush().unwrap();

    assert_eq!(db.segment_count(), 2);
    assert_eq!(db.get(b"key").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(b"gone").unwrap(), None);
    assert_eq!(db.len(), 1);
}

#[test]
fn test_lsmdb_recovers_unflushed_wal() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events");
    let options = EngineOptions {
        sync_strategy: SyncStrategy::EveryWrite,
        ..EngineOptions::default()
    };

    {
        let db = LsmDb::open(&path, &options).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.delete(b"a").unwrap();
        assert_eq!(db.segment_count(), 0);
        // Dropped without close: only the WAL has the data
    }

    let db = LsmDb::open(&path, &options).unwrap();
    assert_eq!(db.segment_count(), 1);
    assert_eq!(fs::metadata(path.join("wal.log")).unwrap().len(), 0);
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_lsmdb_close_flushes_memtable() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events");

    let db = LsmDb::open(&path, &EngineOptions::default()).unwrap();
    db.put(b"k", b"v").unwrap();
    db.close().unwrap();
    assert_eq!(segment_files(&path), 1);
    drop(db);

    let db = LsmDb::open(&path, &EngineOptions::default()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_lsmdb_detects_corrupted_segment() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events");

    {
        let db = LsmDb::open(&path, &EngineOptions::default()).unwrap();
        db.put(b"key", b"value").unwrap();
        db.flush().unwrap();
    }

    let segment = path.join("segments").join("segment_000001.sst");
    let mut bytes = fs::read(&segment).unwrap();
    // Last value byte sits just before the 4-byte footer
    let at = bytes.len() - 5;
    bytes[at] ^= 0xFF;
    fs::write(&segment, &bytes).unwrap();

    let result = LsmDb::open(&path, &EngineOptions::default());
    assert!(matches!(result, Err(HubError::Corruption(_))));
}

#[test]
fn test_lsmdb_ignores_unfinished_segment() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events");

    {
        let db = LsmDb::open(&path, &EngineOptions::default()).unwrap();
        db.put(b"key", b"value").unwrap();
        db.flush().unwrap();
    }

    let leftover = path.join("segments").join("segment_000002.sst.tmp");
    fs::write(&leftover, b"half written").unwrap();

    let db = LsmDb::open(&path, &EngineOptions::default()).unwrap();
    assert_eq!(db.segment_count(), 1);
    assert!(!leftover.exists());
    assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_lsmdb_len_never_drops_during_flushes() {
    let temp = TempDir::new().unwrap();
    let db = LsmDb::open(&temp.path().join("events"), &options_with_small_memtable()).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..400 {
                db.put(format!("key{:04}", i).as_bytes(), b"some value bytes").unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        s.spawn(|| {
            // Keys are only ever added, so the count must never go down
            let mut last = 0;
            while !done.load(Ordering::SeqCst) {
                let now = db.len();
                assert!(now >= last, "len dropped from {} to {}", last, now);
                last = now;
            }
        });
    });

    assert!(db.segment_count() > 1);
    assert_eq!(db.len(), 400);
}
