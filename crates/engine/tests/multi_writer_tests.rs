//! Multi-Writer Convergence Tests
//!
//! Several handles (standing in for separate processes) share one file.
//! Coordination happens only through the advisory lock, and a monitoring
//! store absorbs other writers' lines before it compacts.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tsvkv_durability::{append_delete, append_record, AppendOptions};
use tsvkv_engine::{Store, StoreBuilder};
use tsvkv_storage::{load_file, read_last_record, LoadOptions};

const HEADER: &str = "id\tvalue";

fn idle(path: &Path) -> StoreBuilder {
    Store::builder(path)
        .header(HEADER)
        .poll_delay(Duration::from_secs(3600))
}

fn load_options() -> LoadOptions {
    LoadOptions {
        header: Some(HEADER.to_string()),
        ..LoadOptions::default()
    }
}

/// Test: a standalone append survives the store's next compaction
#[test]
fn test_external_append_absorbed_before_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let store = idle(&path).open().unwrap();

    store.set("x", ["1"]).unwrap();
    store.flush().unwrap();
    append_record(&path, Some(HEADER), "x", &["2"], &AppendOptions::default()).unwrap();
    append_record(&path, Some(HEADER), "y", &["9"], &AppendOptions::default()).unwrap();

    assert!(store.sync(true));
    assert_eq!(store.get("x").unwrap().fields(), &["x", "2"]);
    assert_eq!(store.get("y").unwrap().fields(), &["y", "9"]);
    assert_eq!(fs::read_to_string(&path).unwrap(), "id\tvalue\nx\t2\ny\t9\n");
}

/// Test: an external tombstone removes the key on reconcile
#[test]
fn test_external_delete_absorbed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let store = idle(&path).open().unwrap();
    store.extend([("a", ["1"]), ("b", ["2"])]).unwrap();
    store.flush().unwrap();

    append_delete(&path, Some(HEADER), "a", &AppendOptions::default()).unwrap();
    assert!(store.sync(true));
    assert_eq!(store.keys(), vec!["b"]);
}

/// Test: without monitoring, compaction writes memory only
#[test]
fn test_unmonitored_compaction_overwrites_external_lines() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let store = idle(&path).monitor_external_changes(false).open().unwrap();
    store.set("a", ["1"]).unwrap();
    store.flush().unwrap();

    append_record(&path, Some(HEADER), "z", &["26"], &AppendOptions::default()).unwrap();
    assert!(store.sync(true));
    assert!(!store.contains("z"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "id\tvalue\na\t1\n");
}

/// Test: two stores on one file converge after each compacts in turn
#[test]
fn test_two_stores_converge() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let first = idle(&path).open().unwrap();
    let second = idle(&path).rewrite_on_load(false).open().unwrap();

    first.set("a", ["from-first"]).unwrap();
    second.set("b", ["from-second"]).unwrap();
    first.flush().unwrap();
    second.flush().unwrap();

    assert!(first.sync(true));
    assert!(second.sync(true));
    assert_eq!(first.keys(), vec!["a", "b"]);
    assert_eq!(second.keys(), vec!["a", "b"]);

    first.close().unwrap();
    second.close().unwrap();
    let loaded = load_file(&path, &load_options()).unwrap();
    assert_eq!(loaded.records.len(), 2);
}

/// Test: concurrent standalone appenders never interleave partial lines
#[test]
fn test_concurrent_appenders_and_store() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let store = Store::builder(&path)
        .header(HEADER)
        .poll_delay(Duration::from_millis(1))
        .rewrite_interval(Duration::from_millis(1))
        .open()
        .unwrap();
    let barrier = Arc::new(Barrier::new(4));

    let appenders: Vec<_> = (0..4)
        .map(|t| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    let key = format!("ext{}-{}", t, i);
                    append_record(&path, Some(HEADER), &key, &[i.to_string()], &AppendOptions::default())
                        .unwrap();
                }
            })
        })
        .collect();
    for i in 0..100 {
        store.set(&format!("own-{}", i), [i.to_string()]).unwrap();
        store.set(&format!("own-{}", i), [(i + 1).to_string()]).unwrap();
    }
    for h in appenders {
        h.join().unwrap();
    }

    assert!(store.sync(true));
    assert_eq!(store.len(), 300);
    store.close().unwrap();

    let loaded = load_file(&path, &load_options()).unwrap();
    assert_eq!(loaded.records.len(), 300);
    assert_eq!(loaded.stats.dropped, 0);
    assert_eq!(loaded.records.get("own-99").unwrap().fields(), &["own-99", "100"]);
    assert_eq!(loaded.records.get("ext3-49").unwrap().fields(), &["ext3-49", "49"]);
}

/// Test: other writers keep appending while the store compacts repeatedly
/// Expected: every external line survives; none lands between reload and truncate
#[test]
fn test_appenders_during_forced_compactions() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let store = idle(&path).open().unwrap();
    store.set("own", ["0"]).unwrap();
    let barrier = Arc::new(Barrier::new(5));

    let appenders: Vec<_> = (0..4)
        .map(|t| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..150 {
                    let key = format!("ext{}-{}", t, i);
                    append_record(&path, Some(HEADER), &key, &[i.to_string()], &AppendOptions::default())
                        .unwrap();
                }
            })
        })
        .collect();

    barrier.wait();
    for _ in 0..40 {
        assert!(store.sync(true));
    }
    for h in appenders {
        h.join().unwrap();
    }
    assert!(store.sync(true));

    assert_eq!(store.len(), 601);
    let loaded = load_file(&path, &load_options()).unwrap();
    assert_eq!(loaded.records.len(), 601);
    assert_eq!(loaded.records.get("ext2-149").unwrap().fields(), &["ext2-149", "149"]);
    store.close().unwrap();
}

/// Test: tail read returns the latest record without replaying the file
#[test]
fn test_tail_read_after_store_writes() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.tsv");
    let store = idle(&path).open().unwrap();
    store.extend([("a", ["1"]), ("b", ["2"])]).unwrap();
    store.set("a", ["3"]).unwrap();
    store.close().unwrap();

    let last = read_last_record(&path, &load_options()).unwrap().unwrap();
    assert_eq!(last.fields(), &["a", "3"]);
}
