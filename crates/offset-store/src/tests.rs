//! Unit tests for offset store key derivation and backends.

use crate::{offset_store_key, FileOffsetStore, MemoryOffsetStore, OffsetStore};

// ============================================================================
// Key derivation
// ============================================================================

#[test]
fn test_key_format_is_stable() {
    // Stored keys from older deployments must keep resolving.
    assert_eq!(offset_store_key("t", 3, "g"), "t-3-g");
    assert_eq!(offset_store_key("events", 0, "dump"), "events-0-dump");
}

#[test]
fn test_key_differs_per_component() {
    let base = offset_store_key("t", 3, "g");
    assert_ne!(offset_store_key("u", 3, "g"), base);
    assert_ne!(offset_store_key("t", 4, "g"), base);
    assert_ne!(offset_store_key("t", 3, "h"), base);
}

// ============================================================================
// Memory store
// ============================================================================

#[test]
fn test_memory_store_roundtrip() {
    let mut store = MemoryOffsetStore::new();
    let key = offset_store_key("events", 0, "g");

    assert!(!store.has_offset(&key).unwrap());
    store.save_offset(&key, 42).unwrap();
    assert!(store.has_offset(&key).unwrap());
    assert_eq!(store.load_offset(&key).unwrap(), 42);
}

#[test]
fn test_memory_store_load_missing_is_error() {
    let store = MemoryOffsetStore::new();
    assert!(store.load_offset("events-0-g").is_err());
}

#[test]
fn test_memory_store_clones_share_state() {
    let store = MemoryOffsetStore::new();
    let mut writer = store.clone();

    writer.save_offset("events-0-g", 7).unwrap();
    assert_eq!(store.load_offset("events-0-g").unwrap(), 7);

    writer.close().unwrap();
    assert!(store.is_closed());
}

#[test]
fn test_memory_store_failure_injection() {
    let store = MemoryOffsetStore::new();
    let mut writer = store.clone();

    store.fail_writes(true);
    assert!(writer.save_offset("events-0-g", 7).is_err());
    assert!(writer.flush().is_err());

    store.fail_writes(false);
    writer.save_offset("events-0-g", 7).unwrap();
    assert_eq!(store.load_offset("events-0-g").unwrap(), 7);
}

// ============================================================================
// File store
// ============================================================================

#[test]
fn test_file_store_roundtrip_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    let mut store = FileOffsetStore::open(&path).unwrap();
    store.save_offset("events-0-g", 10).unwrap();
    store.save_offset("events-1-g", 20).unwrap();
    store.flush().unwrap();

    let reopened = FileOffsetStore::open(&path).unwrap();
    assert_eq!(reopened.load_offset("events-0-g").unwrap(), 10);
    assert_eq!(reopened.load_offset("events-1-g").unwrap(), 20);
    assert!(!reopened.has_offset("events-2-g").unwrap());
}

#[test]
fn test_file_store_unflushed_writes_are_lost() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    let mut store = FileOffsetStore::open(&path).unwrap();
    store.save_offset("events-0-g", 10).unwrap();
    store.flush().unwrap();
    store.save_offset("events-0-g", 99).unwrap();
    drop(store);

    let reopened = FileOffsetStore::open(&path).unwrap();
    assert_eq!(reopened.load_offset("events-0-g").unwrap(), 10);
}

#[test]
fn test_file_store_close_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    let mut store = FileOffsetStore::open(&path).unwrap();
    store.save_offset("events-0-g", 10).unwrap();
    store.close().unwrap();

    let reopened = FileOffsetStore::open(&path).unwrap();
    assert_eq!(reopened.load_offset("events-0-g").unwrap(), 10);
}

#[test]
fn test_file_store_flush_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    let mut store = FileOffsetStore::open(&path).unwrap();
    store.save_offset("events-0-g", 10).unwrap();
    store.flush().unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn test_file_store_untouched_flush_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    let mut store = FileOffsetStore::open(&path).unwrap();
    store.flush().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_file_store_rejects_corrupt_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");
    std::fs::write(&path, "not json").unwrap();

    assert!(FileOffsetStore::open(&path).is_err());
}
