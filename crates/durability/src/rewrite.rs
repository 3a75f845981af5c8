//! Compaction writer
//!
//! Replaces the file wholesale with the header and the current records.
//! Tombstones and overwritten lines disappear here and nowhere else.
//!
//! The rewrite happens in place under the gate rather than via a temp file
//! and rename: a cooperating process blocked on the advisory lock holds a
//! handle to this inode, and a rename would make its append vanish.

use crate::gate::{FileGate, GateGuard, OpenMode};
use crate::queue::AppendQueue;
use std::io::{self, Cursor};
use std::path::Path;
use tracing::debug;
use tsvkv_core::{Record, StoreResult};
use tsvkv_storage::{encode_record, load_from_reader, LoadOptions, Loaded};

/// Rewrite the file from `records` and drop the queue they supersede.
///
/// The queue is cleared only if every line was written and synced. Returns
/// the number of records written.
pub fn rewrite_file<'r, I>(
    gate: &FileGate,
    queue: &AppendQueue,
    header: Option<&str>,
    records: I,
) -> io::Result<usize>
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut guard = gate.open(OpenMode::Truncate)?;
    let written = write_records(&mut guard, queue, header, records)?;
    drop(guard);

    debug!(target: "tsvkv::rewrite", path = %gate.path().display(), records = written, "Rewrote file");
    Ok(written)
}

/// Truncate the file to just the header (or nothing) and drop the queue.
pub fn truncate_to_header(
    gate: &FileGate,
    queue: &AppendQueue,
    header: Option<&str>,
) -> io::Result<()> {
    rewrite_file(gate, queue, header, std::iter::empty()).map(|_| ())
}

/// Drain, re-read and rewrite the file under one hold of the gate.
///
/// Nothing can be appended between [`load`](Self::load) and
/// [`rewrite`](Self::rewrite), so records built from the loaded content
/// include every line another writer managed to commit.
pub struct RewriteSession<'g> {
    guard: GateGuard<'g>,
    queue: &'g AppendQueue,
    path: &'g Path,
}

impl<'g> RewriteSession<'g> {
    /// Lock the file for update
    pub fn begin(gate: &'g FileGate, queue: &'g AppendQueue) -> io::Result<Self> {
        Ok(Self {
            guard: gate.open(OpenMode::Update)?,
            queue,
            path: gate.path(),
        })
    }

    /// Append the queued lines to the locked file
    pub fn drain(&mut self) -> io::Result<usize> {
        self.queue.write_locked(&mut self.guard)
    }

    /// Replay the file as it is now.
    pub fn load(&mut self, opts: &LoadOptions) -> StoreResult<Loaded> {
        let bytes = self.guard.read_all()?;
        load_from_reader(Cursor::new(bytes), opts)
    }

    /// Replace the file with `header` and `records`, then release the lock.
    pub fn rewrite<'r, I>(mut self, header: Option<&str>, records: I) -> io::Result<usize>
    where
        I: IntoIterator<Item = &'r Record>,
    {
        self.guard.truncate()?;
        let written = write_records(&mut self.guard, self.queue, header, records)?;
        debug!(target: "tsvkv::rewrite", path = %self.path.display(), records = written, "Rewrote file after reload");
        Ok(written)
    }
}

fn write_records<'r, I>(
    guard: &mut GateGuard<'_>,
    queue: &AppendQueue,
    header: Option<&str>,
    records: I,
) -> io::Result<usize>
where
    I: IntoIterator<Item = &'r Record>,
{
    if let Some(header) = header {
        guard.write_line(header)?;
    }
    let mut written = 0;
    for record in records {
        guard.write_line(&encode_record(record))?;
        written += 1;
    }
    guard.sync()?;
    queue.clear_locked(guard);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::FaultInjector;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tsvkv_core::Encoding;

    fn rec(fields: &[&str]) -> Record {
        Record::new(fields.iter().map(|f| f.to_string()).collect())
    }

    #[test]
    fn rewrite_replaces_content_and_clears_queue() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.tsv");
        std::fs::write(&path, "id\tv\na\t1\na\t\nb\t2\nb\t3\n").unwrap();
        let gate = FileGate::new(&path, Encoding::Utf8);
        let queue = AppendQueue::new();
        queue.push("b\t3".into());

        let records = vec![rec(&["b", "3"])];
        assert_eq!(rewrite_file(&gate, &queue, Some("id\tv"), &records).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id\tv\nb\t3\n");
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_rewrite_keeps_queue_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.tsv");
        std::fs::write(&path, "a\t1\n").unwrap();
        let faults = Arc::new(FaultInjector::new());
        let gate = FileGate::new(&path, Encoding::Utf8).with_faults(Arc::clone(&faults));
        let queue = AppendQueue::new();
        queue.push("b\t2".into());

        faults.fail_next(1);
        let records = vec![rec(&["a", "1"]), rec(&["b", "2"])];
        assert!(rewrite_file(&gate, &queue, None, &records).is_err());
        assert_eq!(queue.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\t1\n");
    }

    #[test]
    fn truncate_keeps_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.tsv");
        std::fs::write(&path, "id\tv\na\t1\n").unwrap();
        let gate = FileGate::new(&path, Encoding::Utf8);
        let queue = AppendQueue::new();

        truncate_to_header(&gate, &queue, Some("id\tv")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id\tv\n");

        truncate_to_header(&gate, &queue, None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn session_keeps_lines_appended_before_it_began() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.tsv");
        let gate = FileGate::new(&path, Encoding::Utf8);
        let queue = AppendQueue::new();
        queue.push("b\t2".into());
        let opts = LoadOptions {
            header: Some("id\tv".to_string()),
            ..LoadOptions::default()
        };

        // Another writer's torn line gets terminated before the drain
        std::fs::write(&path, "id\tv\na\t1\nx\t9").unwrap();

        let mut session = RewriteSession::begin(&gate, &queue).unwrap();
        assert_eq!(session.drain().unwrap(), 1);
        let loaded = session.load(&opts).unwrap();
        let keys: Vec<_> = loaded.records.keys().collect();
        assert_eq!(keys, vec!["a", "x", "b"]);
        session.rewrite(Some("id\tv"), loaded.records.iter()).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id\tv\na\t1\nx\t9\nb\t2\n"
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_session_open_keeps_queue() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.tsv");
        let faults = Arc::new(FaultInjector::new());
        let gate = FileGate::new(&path, Encoding::Utf8).with_faults(Arc::clone(&faults));
        let queue = AppendQueue::new();
        queue.push("a\t1".into());

        faults.fail_next(1);
        assert!(RewriteSession::begin(&gate, &queue).is_err());
        assert_eq!(queue.len(), 1);
    }
}
