//! Insertion-ordered record container
//!
//! Records are indexed by key in an `FxHashMap` and ordered by a sequence
//! number kept in a `BTreeMap`. Updating an existing key keeps its position;
//! [`OrderedRecords::push_back`] moves it to the end, which is what replay
//! needs (the last occurrence in the file wins).

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tsvkv_core::Record;

#[derive(Debug, Clone)]
struct Slot {
    seq: i64,
    record: Record,
}

/// Ordered mapping key → record.
#[derive(Debug, Clone)]
pub struct OrderedRecords {
    index: FxHashMap<String, Slot>,
    order: BTreeMap<i64, String>,
    next_back: i64,
    next_front: i64,
}

impl OrderedRecords {
    /// Empty container
    pub fn new() -> Self {
        Self {
            index: FxHashMap::default(),
            order: BTreeMap::new(),
            next_back: 0,
            next_front: -1,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether there are no records
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Look up a record
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.index.get(key).map(|slot| &slot.record)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or update in place. Returns the previous record.
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        if let Some(slot) = self.index.get_mut(record.key()) {
            return Some(std::mem::replace(&mut slot.record, record));
        }
        let seq = self.take_back_seq();
        self.order.insert(seq, record.key().to_string());
        self.index.insert(record.key().to_string(), Slot { seq, record });
        None
    }

    /// Insert, moving the key to the end if already present.
    pub fn push_back(&mut self, record: Record) -> Option<Record> {
        let previous = self.remove(record.key());
        self.insert(record);
        previous
    }

    /// Remove a record
    pub fn remove(&mut self, key: &str) -> Option<Record> {
        let slot = self.index.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.record)
    }

    /// Remove and return the first record
    pub fn pop_first(&mut self) -> Option<Record> {
        let key = self.order.values().next()?.clone();
        self.remove(&key)
    }

    /// Remove and return the last record
    pub fn pop_last(&mut self) -> Option<Record> {
        let key = self.order.values().next_back()?.clone();
        self.remove(&key)
    }

    /// Move an existing key to the end (`last`) or the front.
    /// Returns false when the key is absent.
    pub fn move_to_end(&mut self, key: &str, last: bool) -> bool {
        let new_seq = if last {
            self.take_back_seq()
        } else {
            self.take_front_seq()
        };
        let Some(slot) = self.index.get_mut(key) else {
            return false;
        };
        self.order.remove(&slot.seq);
        slot.seq = new_seq;
        self.order.insert(new_seq, key.to_string());
        true
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.index.clear();
        self.order.clear();
        self.next_back = 0;
        self.next_front = -1;
    }

    /// Records in order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Record> + '_ {
        self.order
            .values()
            .filter_map(move |key| self.index.get(key).map(|slot| &slot.record))
    }

    /// Keys in order
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        self.order.values().map(String::as_str)
    }

    /// Last record in order
    pub fn last(&self) -> Option<&Record> {
        self.iter().next_back()
    }

    fn take_back_seq(&mut self) -> i64 {
        let seq = self.next_back;
        self.next_back += 1;
        seq
    }

    fn take_front_seq(&mut self) -> i64 {
        let seq = self.next_front;
        self.next_front -= 1;
        seq
    }
}

impl Default for OrderedRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Record> for OrderedRecords {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut records = OrderedRecords::new();
        for record in iter {
            records.push_back(record);
        }
        records
    }
}

impl PartialEq for OrderedRecords {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for OrderedRecords {}
