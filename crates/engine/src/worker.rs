//! Sync worker
//!
//! One thread per store. Each cycle it:
//!
//! 1. Sleeps on a condvar for the poll delay (woken early on shutdown)
//! 2. Compacts the file if desynced, or dirty with the rewrite interval
//!    elapsed since the file was last modified
//! 3. Drains the append queue
//!
//! Open has already loaded (and possibly compacted) the file, so the first
//! cycle starts with a sleep.
//!
//! Compaction holds the state lock for its whole duration. When monitoring
//! external changes, the own queue is drained, the file re-read and then
//! rewritten within one [`RewriteSession`], so no other writer can append
//! between the reload and the truncation. The reload is skipped only while
//! the file may be partial after a failed rewrite or clear.
//!
//! Changes made in memory-only mode never reached the file; they are laid
//! over the reloaded records so a compaction persists them whether or not
//! external changes are monitored.

use crate::store::{Shared, State};
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use tsvkv_core::{Arity, StoreResult};
use tsvkv_durability::{rewrite_file, RewriteSession};
use tsvkv_storage::OrderedRecords;

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "tsvkv-sync";

/// Start the worker thread for `shared`.
pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    debug!(target: "tsvkv::worker", path = %shared.path.display(), "Sync worker started");

    loop {
        wait(shared);
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        sync_cycle(shared, false);
        let _ = drain(shared);
    }

    final_flush(shared);
    debug!(target: "tsvkv::worker", path = %shared.path.display(), "Sync worker stopped");
}

fn wait(shared: &Shared) {
    let (lock, cvar) = &shared.wake;
    let mut signaled = lock.lock();
    if !*signaled {
        cvar.wait_for(&mut signaled, shared.options.effective_poll_delay());
    }
    *signaled = false;
}

/// Last work before the thread exits; a desynced store is compacted.
pub(crate) fn final_flush(shared: &Shared) {
    let rewrite = shared.rewrite_on_close.load(Ordering::Acquire)
        || shared.desynced.load(Ordering::Acquire);
    if rewrite && !shared.is_memory_only() {
        sync_cycle(shared, true);
    }
    let _ = drain(shared);
}

/// Write queued lines; a failure leaves them queued and desyncs the store.
pub(crate) fn drain(shared: &Shared) -> io::Result<usize> {
    shared.queue.drain_to(&shared.gate).map_err(|e| {
        shared.mark_desynced("append", &e);
        e
    })
}

/// One compaction attempt. Returns whether the file was rewritten.
pub(crate) fn sync_cycle(shared: &Shared, force: bool) -> bool {
    let mut state = shared.state.lock();
    if !should_rewrite(shared, force) {
        return false;
    }

    if shared.options.monitor_external_changes && !shared.partial_file.load(Ordering::Acquire) {
        reconcile_and_compact(shared, &mut state)
    } else {
        compact(shared, &mut state)
    }
}

fn should_rewrite(shared: &Shared, force: bool) -> bool {
    if force {
        return true;
    }
    if shared.is_memory_only() {
        return false;
    }
    if shared.desynced.load(Ordering::Acquire) {
        return true;
    }
    if !shared.dirty.load(Ordering::Acquire) {
        return false;
    }
    let interval = shared.options.rewrite_interval;
    if interval.is_zero() {
        return false;
    }
    match file_age(&shared.path) {
        Some(age) => age >= interval,
        None => true,
    }
}

/// Time since the file was last modified; `None` if it cannot be read.
fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

/// Drain, reload and rewrite while holding the gate throughout.
fn reconcile_and_compact(shared: &Shared, state: &mut State) -> bool {
    let mut session = match RewriteSession::begin(&shared.gate, &shared.queue) {
        Ok(session) => session,
        Err(e) => {
            // Nothing was written; the file is intact for the next attempt.
            shared.mark_desynced("reload", &e);
            return false;
        }
    };
    if let Err(e) = reconcile(shared, state, &mut session) {
        // Memory stays authoritative; the rewrite below repairs the file.
        shared.mark_desynced("reload", &e);
    }
    let result = session.rewrite(shared.header.as_deref(), state.records.iter());
    finish_compaction(shared, state, result)
}

/// Flush own appends and absorb whatever other writers added since.
fn reconcile(
    shared: &Shared,
    state: &mut State,
    session: &mut RewriteSession<'_>,
) -> StoreResult<()> {
    session.drain()?;
    let loaded = session.load(&shared.load_options)?;

    let mut records = if shared.reordered.load(Ordering::Acquire) {
        keep_memory_order(&state.records, loaded.records)
    } else {
        loaded.records
    };
    overlay_local(&mut records, state);
    if records != state.records {
        debug!(
            target: "tsvkv::worker",
            path = %shared.path.display(),
            before = state.records.len(),
            after = records.len(),
            "Absorbed external changes"
        );
    }
    state.records = records;
    if loaded.arity != Arity::Unset {
        state.arity = loaded.arity;
    }
    Ok(())
}

/// Re-apply memory-only changes on top of reloaded records.
///
/// Deleted keys are removed; set keys take their memory value, in place if
/// the file has them and otherwise appended in memory order. A memory-only
/// `clear` discards the reloaded records first.
fn overlay_local(records: &mut OrderedRecords, state: &State) {
    if state.local_clear {
        records.clear();
    }
    if state.local.is_empty() {
        return;
    }
    for key in &state.local {
        if !state.records.contains_key(key) {
            records.remove(key);
        }
    }
    for record in state.records.iter() {
        if state.local.contains(record.key()) {
            records.insert(record.clone());
        }
    }
}

/// Values from `loaded`, ordered as in `memory`, with new keys at the end.
fn keep_memory_order(memory: &OrderedRecords, mut loaded: OrderedRecords) -> OrderedRecords {
    let mut merged = OrderedRecords::new();
    for key in memory.keys() {
        if let Some(record) = loaded.remove(key) {
            merged.push_back(record);
        }
    }
    while let Some(record) = loaded.pop_first() {
        merged.push_back(record);
    }
    merged
}

/// Rewrite the file from memory. Caller holds the state lock.
fn compact(shared: &Shared, state: &mut State) -> bool {
    let result = rewrite_file(
        &shared.gate,
        &shared.queue,
        shared.header.as_deref(),
        state.records.iter(),
    );
    finish_compaction(shared, state, result)
}

fn finish_compaction(shared: &Shared, state: &mut State, result: io::Result<usize>) -> bool {
    match result {
        Ok(_) => {
            state.reset_local();
            shared.dirty.store(false, Ordering::Release);
            shared.reordered.store(false, Ordering::Release);
            shared.partial_file.store(false, Ordering::Release);
            if shared.desynced.swap(false, Ordering::AcqRel) {
                info!(target: "tsvkv::worker", path = %shared.path.display(), "Resynced after rewrite");
            }
            true
        }
        Err(e) => {
            shared.mark_partial("rewrite", &e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsvkv_core::Record;

    fn records(keys: &[(&str, &str)]) -> OrderedRecords {
        keys.iter()
            .map(|(k, v)| Record::new(vec![k.to_string(), v.to_string()]))
            .collect()
    }

    #[test]
    fn keep_memory_order_takes_file_values() {
        let memory = records(&[("c", "1"), ("a", "1"), ("b", "1")]);
        let loaded = records(&[("a", "2"), ("b", "1"), ("c", "1"), ("d", "9")]);
        let merged = keep_memory_order(&memory, loaded);
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["c", "a", "b", "d"]);
        assert_eq!(merged.get("a").unwrap().fields(), &["a", "2"]);
    }

    #[test]
    fn keep_memory_order_drops_keys_gone_from_file() {
        let memory = records(&[("a", "1"), ("b", "1")]);
        let loaded = records(&[("b", "1")]);
        let merged = keep_memory_order(&memory, loaded);
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    fn state_with(memory: OrderedRecords, local: &[&str], local_clear: bool) -> State {
        State {
            records: memory,
            arity: Arity::Fixed(2),
            local: local.iter().map(|k| k.to_string()).collect(),
            local_clear,
        }
    }

    #[test]
    fn overlay_local_keeps_memory_only_changes() {
        let memory = records(&[("a", "1"), ("b", "7"), ("n", "new")]);
        let state = state_with(memory, &["b", "n", "gone"], false);
        let mut loaded = records(&[("gone", "1"), ("a", "1"), ("b", "1"), ("x", "ext")]);
        overlay_local(&mut loaded, &state);
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["a", "b", "x", "n"]);
        assert_eq!(loaded.get("b").unwrap().fields(), &["b", "7"]);
    }

    #[test]
    fn overlay_local_clear_discards_file_records() {
        let state = state_with(records(&[("n", "1")]), &["n"], true);
        let mut loaded = records(&[("a", "1"), ("b", "1")]);
        overlay_local(&mut loaded, &state);
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["n"]);
    }

    #[test]
    fn file_age_of_missing_file_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(file_age(&dir.path().join("missing.tsv")).is_none());
    }
}
