//! Append queue
//!
//! Mutations push encoded lines here and return immediately; the sync
//! worker drains the queue to disk under the [`FileGate`].
//!
//! Lines leave the queue only after they were written and flushed. A failed
//! drain keeps them queued, so the next attempt writes them again in order.
//! Everything that removes lines (drain, compaction, clear) runs while the
//! gate is held, which serializes those against each other; `push` only
//! takes the queue's own lock and never waits on disk.

use crate::gate::{FileGate, GateGuard, OpenMode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use tracing::debug;

/// Ordered buffer of lines not yet on disk.
#[derive(Debug, Default)]
pub struct AppendQueue {
    lines: Mutex<VecDeque<String>>,
}

impl AppendQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one line (without trailing newline)
    pub fn push(&self, line: String) {
        self.lines.lock().push_back(line);
    }

    /// Lines waiting
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Copy of the waiting lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// Drop all waiting lines. Caller must hold the gate.
    pub fn clear_locked(&self, _gate: &GateGuard<'_>) {
        self.lines.lock().clear();
    }

    /// Write every waiting line through an already-open gate session.
    ///
    /// The lines are removed only once they have been flushed.
    pub fn write_locked(&self, guard: &mut GateGuard<'_>) -> io::Result<usize> {
        let pending = self.snapshot();
        if pending.is_empty() {
            return Ok(0);
        }
        for line in &pending {
            guard.write_line(line)?;
        }
        guard.flush()?;

        // Only push() can have run since the snapshot, and it appends at the back.
        let mut lines = self.lines.lock();
        let n = pending.len().min(lines.len());
        lines.drain(..n);
        Ok(pending.len())
    }

    /// Open the gate in append mode and drain the queue.
    pub fn drain_to(&self, gate: &FileGate) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let mut guard = gate.open(OpenMode::Append)?;
        let written = self.write_locked(&mut guard)?;
        drop(guard);
        debug!(target: "tsvkv::queue", path = %gate.path().display(), written, "Committed appends");
        Ok(written)
    }
}
