//! Round-trip tests through the public facade
//!
//! Random mutation sequences are applied to a store and to a plain model;
//! after close and reopen the file must reproduce the model exactly.

use proptest::prelude::*;
use std::time::Duration;
use tempfile::TempDir;
use tsvkv::{load_file, read_last_record, LoadOptions, Store};

#[derive(Debug, Clone)]
enum Op {
    Set(u8, String),
    Delete(u8),
    MoveToEnd(u8),
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0u8..16, "[a-z ]{0,6}").prop_map(|(k, v)| Op::Set(k, v)),
        3 => (0u8..16).prop_map(Op::Delete),
        1 => (0u8..16).prop_map(Op::MoveToEnd),
        1 => Just(Op::Clear),
    ]
}

/// Insertion-ordered model: `Vec` of (key, value); an empty value is a live record
fn apply_model(model: &mut Vec<(String, String)>, op: &Op) {
    match op {
        Op::Set(k, v) => {
            let key = format!("k{}", k);
            let value = v.trim().to_string();
            if let Some(slot) = model.iter_mut().find(|(mk, _)| *mk == key) {
                slot.1 = value;
            } else {
                model.push((key, value));
            }
        }
        Op::Delete(k) => {
            let key = format!("k{}", k);
            model.retain(|(mk, _)| *mk != key);
        }
        Op::MoveToEnd(k) => {
            let key = format!("k{}", k);
            if let Some(pos) = model.iter().position(|(mk, _)| *mk == key) {
                let entry = model.remove(pos);
                model.push(entry);
            }
        }
        Op::Clear => model.clear(),
    }
}

fn apply_store(store: &Store, op: &Op) {
    match op {
        Op::Set(k, v) => store.set(&format!("k{}", k), ["x", v.as_str()]).unwrap(),
        Op::Delete(k) => {
            store.delete(&format!("k{}", k)).unwrap();
        }
        Op::MoveToEnd(k) => {
            store.move_to_end(&format!("k{}", k), true);
        }
        Op::Clear => store.clear().unwrap(),
    }
}

fn pairs(store: &Store) -> Vec<(String, String)> {
    store
        .iter()
        .map(|(k, r)| (k, r.fields()[2].clone()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn reopen_reproduces_memory(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rt.tsv");
        let mut model = Vec::new();

        {
            // Compacting from memory on close keeps in-place updates in place
            let store = Store::builder(&path)
                .header("id\ttag\tvalue")
                .poll_delay(Duration::from_millis(2))
                .monitor_external_changes(false)
                .rewrite_on_close(true)
                .open()
                .unwrap();
            for op in &ops {
                apply_model(&mut model, op);
                apply_store(&store, op);
                prop_assert_eq!(pairs(&store), model.clone());
            }
            store.close().unwrap();
        }

        let reopened = Store::builder(&path).header("id\ttag\tvalue").open().unwrap();
        prop_assert_eq!(pairs(&reopened), model.clone());

        let last = read_last_record(&path, &LoadOptions {
            header: Some("id\ttag\tvalue".to_string()),
            ..LoadOptions::default()
        })
        .unwrap();
        prop_assert_eq!(last.map(|r| r.key().to_string()), model.last().map(|(k, _)| k.clone()));
    }
}

#[test]
fn test_message_board_index() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("board").join("messages.tsv");

    {
        let store = Store::builder(&path)
            .columns(&["id", "author", "body", "attachment"])
            .open()
            .unwrap();
        store.set("m1", ["alice", "hello\tworld", ""]).unwrap();
        store.set("m2", ["bob", "line one\nline two", "cat.png"]).unwrap();
        store.set("m3", ["carol", "bye", ""]).unwrap();
        store.delete("m2").unwrap();
        store.close().unwrap();
    }

    let loaded = load_file(
        &path,
        &LoadOptions {
            header: Some("id\tauthor\tbody\tattachment".to_string()),
            ..LoadOptions::default()
        },
    )
    .unwrap();
    let keys: Vec<_> = loaded.records.keys().collect();
    assert_eq!(keys, vec!["m1", "m3"]);
    assert_eq!(
        loaded.records.get("m1").unwrap().fields(),
        &["m1", "alice", "hello world", ""]
    );
}
