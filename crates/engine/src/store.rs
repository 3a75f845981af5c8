//! Store handle
//!
//! [`Store`] owns the in-memory ordered state of one backing file and the
//! sync worker thread that persists it. Mutations update memory and queue a
//! line for the worker; only `clear` writes to disk on the caller's thread.
//!
//! # Locking
//!
//! - `state` (records + arity) is taken by every read and mutation, and by the
//!   worker for the whole reload-and-compact step
//! - the file gate is taken by drains, compactions and `clear`; a monitoring
//!   compaction holds it from its drain through the reload to the rewrite
//! - the queue lock is innermost and never held across disk I/O
//!
//! Lock order is always state → gate → queue.
//!
//! # Lifecycle
//!
//! Dropping a `Store` signals the worker, which performs a final drain (or a
//! final compaction with `rewrite_on_close`) and is joined before `drop`
//! returns. [`Store::close`] does the same and reports whether the store
//! ended in sync with its file.

use crate::worker;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use tsvkv_core::{Arity, Entry, Record, StoreError, StoreOptions, StoreResult, MIN_POLL_DELAY};
use tsvkv_durability::{truncate_to_header, AppendQueue, FaultInjector, FileGate};
use tsvkv_storage::{encode_entry, load_file, LoadOptions, OrderedRecords};

use crate::builder::StoreBuilder;

/// Records and the arity they share.
#[derive(Debug)]
pub(crate) struct State {
    pub(crate) records: OrderedRecords,
    pub(crate) arity: Arity,
    /// Keys set or deleted in memory-only mode since the last compaction
    pub(crate) local: FxHashSet<String>,
    /// `clear` ran in memory-only mode since the last compaction
    pub(crate) local_clear: bool,
}

impl State {
    fn new(records: OrderedRecords, arity: Arity) -> Self {
        Self {
            records,
            arity,
            local: FxHashSet::default(),
            local_clear: false,
        }
    }

    /// Forget memory-only changes once the file reflects memory again.
    pub(crate) fn reset_local(&mut self) {
        self.local.clear();
        self.local_clear = false;
    }
}

/// Everything the handle and the worker thread share.
pub(crate) struct Shared {
    pub(crate) path: PathBuf,
    pub(crate) header: Option<String>,
    pub(crate) options: StoreOptions,
    pub(crate) load_options: LoadOptions,
    pub(crate) state: Mutex<State>,
    pub(crate) queue: AppendQueue,
    pub(crate) gate: FileGate,
    pub(crate) dirty: AtomicBool,
    pub(crate) desynced: AtomicBool,
    /// A truncating write failed; the file may hold only part of the state
    pub(crate) partial_file: AtomicBool,
    pub(crate) memory_only: AtomicBool,
    pub(crate) rewrite_on_close: AtomicBool,
    /// Set by `move_to_end`; the next reconcile keeps memory order
    pub(crate) reordered: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    pub(crate) wake: (Mutex<bool>, Condvar),
}

impl Shared {
    pub(crate) fn is_memory_only(&self) -> bool {
        self.memory_only.load(Ordering::Acquire)
    }

    /// Flip into the desynced state, logging only on the transition.
    pub(crate) fn mark_desynced(&self, op: &str, err: &dyn fmt::Display) {
        if self.desynced.swap(true, Ordering::AcqRel) {
            debug!(target: "tsvkv::store", path = %self.path.display(), op, error = %err, "Still desynced");
        } else {
            error!(target: "tsvkv::store", path = %self.path.display(), op, error = %err, "Failed to write; store desynced");
        }
    }

    /// Desync after a failed truncate-and-write. Until a compaction succeeds
    /// the file is not reloaded.
    pub(crate) fn mark_partial(&self, op: &str, err: &dyn fmt::Display) {
        self.partial_file.store(true, Ordering::Release);
        self.mark_desynced(op, err);
    }

    /// Queue an entry, or remember the key when memory-only. Caller holds
    /// the state lock.
    fn enqueue(&self, state: &mut State, entry: &Entry) {
        if self.is_memory_only() {
            state.local.insert(entry.key().to_string());
            return;
        }
        trace!(target: "tsvkv::store", key = entry.key(), "Queued");
        self.queue.push(encode_entry(entry, state.arity));
    }

    /// Remove `key` and queue its tombstone. Caller holds the state lock.
    fn remove_locked(&self, state: &mut State, key: &str) -> Option<Record> {
        let removed = state.records.remove(key)?;
        self.dirty.store(true, Ordering::Release);
        self.enqueue(state, &Entry::Delete(key.to_string()));
        Some(removed)
    }

    fn signal(&self) {
        let (lock, cvar) = &self.wake;
        let mut signaled = lock.lock();
        *signaled = true;
        cvar.notify_one();
    }
}

/// Trim a key; empty keys are rejected.
fn normalize_key(key: &str) -> StoreResult<&str> {
    let key = key.trim();
    if key.is_empty() {
        warn!(target: "tsvkv::store", "Key cannot be empty");
        return Err(StoreError::EmptyKey);
    }
    Ok(key)
}

/// Persistent ordered key-value store backed by a tab-separated file.
///
/// # Example
///
/// ```ignore
/// use tsvkv_engine::Store;
///
/// let store = Store::builder("messages/index.tsv")
///     .header("id\tauthor\tbody")
///     .open()?;
///
/// store.set("m1", ["alice", "hello"])?;
/// assert_eq!(store.get("m1").unwrap().fields(), &["m1", "alice", "hello"]);
///
/// store.close()?;
/// ```
pub struct Store {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Store {
    /// Start building a store for `path`
    pub fn builder(path: impl Into<PathBuf>) -> StoreBuilder {
        StoreBuilder::new(path)
    }

    /// Open with an optional header and explicit options
    pub fn open(
        path: impl Into<PathBuf>,
        header: Option<&str>,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let mut builder = StoreBuilder::new(path).options(options);
        if let Some(header) = header {
            builder = builder.header(header);
        }
        builder.open()
    }

    /// Load the file, compact it if requested, and start the sync worker.
    pub(crate) fn open_with(
        path: PathBuf,
        header: Option<&str>,
        options: StoreOptions,
        faults: Option<Arc<FaultInjector>>,
    ) -> StoreResult<Self> {
        let load_options = LoadOptions::from_store(header, &options);
        let loaded = load_file(&path, &load_options)?;
        let record_count = loaded.records.len();
        let arity = loaded.arity;

        if options.poll_delay < MIN_POLL_DELAY {
            warn!(
                target: "tsvkv::store",
                requested = ?options.poll_delay,
                used = ?MIN_POLL_DELAY,
                "Poll delay too small, clamping"
            );
        }

        let mut gate = FileGate::new(&path, options.encoding);
        if let Some(faults) = faults {
            gate = gate.with_faults(faults);
        }

        let shared = Arc::new(Shared {
            header: load_options.header.clone(),
            path,
            memory_only: AtomicBool::new(options.memory_only),
            rewrite_on_close: AtomicBool::new(options.rewrite_on_close),
            options,
            load_options,
            state: Mutex::new(State::new(loaded.records, loaded.arity)),
            queue: AppendQueue::new(),
            gate,
            dirty: AtomicBool::new(false),
            desynced: AtomicBool::new(false),
            partial_file: AtomicBool::new(false),
            reordered: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            wake: (Mutex::new(false), Condvar::new()),
        });

        if shared.options.rewrite_on_load && !shared.is_memory_only() {
            worker::sync_cycle(&shared, true);
        }

        let handle = worker::spawn(Arc::clone(&shared))?;

        info!(
            target: "tsvkv::store",
            path = %shared.path.display(),
            records = record_count,
            arity = ?arity,
            "Opened"
        );

        Ok(Self {
            shared,
            worker: Some(handle),
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Record for `key`, if present
    pub fn get(&self, key: &str) -> Option<Record> {
        self.shared.state.lock().records.get(key.trim()).cloned()
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.shared.state.lock().records.contains_key(key.trim())
    }

    /// Snapshot of all (key, record) pairs in order.
    ///
    /// Each call starts a fresh iteration over the state at call time.
    pub fn iter(&self) -> std::vec::IntoIter<(String, Record)> {
        let state = self.shared.state.lock();
        state
            .records
            .iter()
            .map(|r| (r.key().to_string(), r.clone()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Keys in order
    pub fn keys(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        state.records.keys().map(str::to_string).collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.shared.state.lock().records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().records.is_empty()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or update the record for `key`.
    ///
    /// Fields are trimmed and `key` is prepended unless it already is field 0.
    /// A record that is only the key deletes it (except in a one-column
    /// store). Setting the value already stored does nothing.
    ///
    /// # Errors
    ///
    /// - `EmptyKey` if `key` is blank after trimming
    /// - `FormatError` if the field count differs from the store's arity
    pub fn set<I, S>(&self, key: &str, fields: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = normalize_key(key)?;
        let record = Record::normalized(key, fields);
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if record.len() == 1 && state.arity != Arity::Fixed(1) {
            shared.remove_locked(&mut state, key);
            return Ok(());
        }
        if !state.arity.accepts(record.len()) {
            return Err(StoreError::FormatError {
                expected: state.arity.get().unwrap_or_default(),
                actual: record.len(),
            });
        }
        if state.arity == Arity::Unset {
            debug!(target: "tsvkv::store", arity = record.len(), "Arity fixed by first record");
            state.arity = Arity::Fixed(record.len());
        }

        match state.records.get(key) {
            Some(existing) if *existing == record => {
                trace!(target: "tsvkv::store", key, "Unchanged");
                return Ok(());
            }
            Some(_) => shared.dirty.store(true, Ordering::Release),
            None if shared.is_memory_only() => shared.dirty.store(true, Ordering::Release),
            None => {}
        }

        shared.enqueue(&mut state, &Entry::Insert(record.clone()));
        state.records.insert(record);
        Ok(())
    }

    /// Set many records, stopping at the first error.
    pub fn extend<I, K, F, S>(&self, entries: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, F)>,
        K: AsRef<str>,
        F: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (key, fields) in entries {
            self.set(key.as_ref(), fields)?;
        }
        Ok(())
    }

    /// Delete `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = normalize_key(key)?;
        let mut state = self.shared.state.lock();
        Ok(self.shared.remove_locked(&mut state, key).is_some())
    }

    /// Remove and return the record for `key`.
    pub fn pop(&self, key: &str) -> StoreResult<Option<Record>> {
        let key = normalize_key(key)?;
        let mut state = self.shared.state.lock();
        Ok(self.shared.remove_locked(&mut state, key))
    }

    /// Remove and return the last record in order.
    pub fn pop_last(&self) -> Option<Record> {
        let mut state = self.shared.state.lock();
        let key = state.records.keys().next_back()?.to_string();
        self.shared.remove_locked(&mut state, &key)
    }

    /// Remove and return the first record in order.
    pub fn pop_first(&self) -> Option<Record> {
        let mut state = self.shared.state.lock();
        let key = state.records.keys().next()?.to_string();
        self.shared.remove_locked(&mut state, &key)
    }

    /// Move `key` to the end (or the front when `last` is false).
    ///
    /// The file only changes order through a compaction, so this marks the
    /// store dirty and turns on rewrite-on-close. Returns false if absent.
    pub fn move_to_end(&self, key: &str, last: bool) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !state.records.move_to_end(key.trim(), last) {
            return false;
        }
        shared.dirty.store(true, Ordering::Release);
        shared.reordered.store(true, Ordering::Release);
        if !shared.rewrite_on_close.swap(true, Ordering::AcqRel) {
            warn!(
                target: "tsvkv::store",
                path = %shared.path.display(),
                "Reordered keys reach the file only after a rewrite; rewrite on close enabled"
            );
        }
        true
    }

    /// Empty the store and truncate the file to its header, synchronously.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the truncation fails; the store is then
    /// desynced and the worker rewrites the (empty) state on its next cycle.
    pub fn clear(&self) -> StoreResult<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        state.records.clear();
        if shared.is_memory_only() {
            shared.dirty.store(true, Ordering::Release);
            state.local.clear();
            state.local_clear = true;
            return Ok(());
        }
        match truncate_to_header(&shared.gate, &shared.queue, shared.header.as_deref()) {
            Ok(()) => {
                state.reset_local();
                shared.dirty.store(false, Ordering::Release);
                shared.partial_file.store(false, Ordering::Release);
                shared.desynced.store(false, Ordering::Release);
                debug!(target: "tsvkv::store", path = %shared.path.display(), "Cleared");
                Ok(())
            }
            Err(e) => {
                shared.mark_partial("clear", &e);
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Disk synchronization
    // ========================================================================

    /// Drain the append queue now. Returns the number of lines written.
    pub fn flush(&self) -> StoreResult<usize> {
        worker::drain(&self.shared).map_err(StoreError::from)
    }

    /// Run one compaction cycle on this thread.
    ///
    /// With `force` the file is rewritten unconditionally; otherwise only if
    /// the dirty/interval/desynced conditions hold. Returns whether the file
    /// was rewritten.
    pub fn sync(&self, force: bool) -> bool {
        worker::sync_cycle(&self.shared, force)
    }

    /// Discard memory and reload from the file, after flushing the queue.
    pub fn reload(&self) -> StoreResult<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        worker::drain(shared)?;
        let loaded = load_file(&shared.path, &shared.load_options)?;
        state.records = loaded.records;
        if loaded.arity != Arity::Unset {
            state.arity = loaded.arity;
        }
        state.reset_local();
        shared.reordered.store(false, Ordering::Release);
        Ok(())
    }

    /// Close the store: stop the worker after its final flush.
    ///
    /// # Errors
    ///
    /// `Desynced` if the last disk operation failed and nothing has repaired
    /// the file since.
    pub fn close(mut self) -> StoreResult<()> {
        self.shutdown_worker();
        if self.is_desynced() {
            return Err(StoreError::Desynced {
                path: self.shared.path.clone(),
            });
        }
        Ok(())
    }

    fn shutdown_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.signal();
        if handle.join().is_err() {
            error!(target: "tsvkv::store", path = %self.shared.path.display(), "Sync worker panicked; flushing on caller thread");
            worker::final_flush(&self.shared);
        }
        debug!(target: "tsvkv::store", path = %self.shared.path.display(), "Closed");
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Mutations exist that only a compaction will reflect
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    /// The last disk operation failed
    pub fn is_desynced(&self) -> bool {
        self.shared.desynced.load(Ordering::Acquire)
    }

    /// Lines waiting in the append queue
    pub fn pending_appends(&self) -> usize {
        self.shared.queue.len()
    }

    /// Current arity
    pub fn arity(&self) -> Arity {
        self.shared.state.lock().arity
    }

    /// Configured header
    pub fn header(&self) -> Option<&str> {
        self.shared.header.as_deref()
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Options the store was opened with
    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    /// Whether mutations bypass the append queue
    pub fn is_memory_only(&self) -> bool {
        self.shared.is_memory_only()
    }

    /// Toggle memory-only mode
    pub fn set_memory_only(&self, memory_only: bool) {
        self.shared.memory_only.store(memory_only, Ordering::Release);
    }

    /// Whether close will compact the file
    pub fn rewrite_on_close(&self) -> bool {
        self.shared.rewrite_on_close.load(Ordering::Acquire)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Store")
            .field("path", &self.shared.path)
            .field("header", &self.shared.header)
            .field("arity", &state.arity)
            .field("records", &state.records.len())
            .field("pending_appends", &self.shared.queue.len())
            .field("dirty", &self.is_dirty())
            .field("desynced", &self.is_desynced())
            .field("memory_only", &self.is_memory_only())
            .field("rewrite_on_close", &self.rewrite_on_close())
            .field("worker_alive", &self.worker.is_some())
            .finish()
    }
}
