//! File access gate
//!
//! Every physical write to the backing file goes through a [`FileGate`]:
//!
//! 1. Take the in-process mutex (callers and the sync worker of one store)
//! 2. Open the file and take an exclusive advisory lock over the whole file
//!    (other processes that cooperate by locking the same path)
//!
//! [`GateGuard`] undoes this in reverse: the OS lock is released and the
//! file closed in `Drop`, before the mutex guard field is dropped.
//!
//! Reads are never gated, except inside an [`OpenMode::Update`] session,
//! which re-reads the file while holding the lock.
//!
//! The OS lock is `flock(2)` (via `fs2`). On Linux it does not exclude
//! `fcntl`/`lockf` locks, so external writers must lock with `flock`.

use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;
use tsvkv_core::Encoding;

/// How the gate opens the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Append to the end
    Append,
    /// Truncate to zero length after the lock is held
    Truncate,
    /// Read and write without truncating; writes start at the end
    Update,
}

/// Makes the next N gate opens fail with an I/O error.
///
/// Used by crash tests to simulate a disk failure at a precise point.
#[derive(Debug, Default)]
pub struct FaultInjector {
    remaining: AtomicUsize,
}

impl FaultInjector {
    /// Injector with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` opens
    pub fn fail_next(&self, count: usize) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Failures still armed
    pub fn armed(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    fn check(&self) -> io::Result<()> {
        let took = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            Err(io::Error::new(io::ErrorKind::Other, "injected I/O failure"))
        } else {
            Ok(())
        }
    }
}

/// Serializes writes to one file across threads and processes.
#[derive(Debug)]
pub struct FileGate {
    path: PathBuf,
    encoding: Encoding,
    lock: Mutex<()>,
    faults: Option<Arc<FaultInjector>>,
}

impl FileGate {
    /// Gate for `path`; lines are written in `encoding`
    pub fn new(path: impl Into<PathBuf>, encoding: Encoding) -> Self {
        Self {
            path: path.into(),
            encoding,
            lock: Mutex::new(()),
            faults: None,
        }
    }

    /// Attach a fault injector
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encoding used by [`GateGuard::write_line`]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Acquire both locks and open the file for writing.
    ///
    /// Blocks until the in-process mutex and the OS lock are both held.
    pub fn open(&self, mode: OpenMode) -> io::Result<GateGuard<'_>> {
        let guard = self.lock.lock();
        if let Some(faults) = &self.faults {
            faults.check()?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            OpenMode::Append => options.read(true).append(true),
            OpenMode::Truncate | OpenMode::Update => {
                options.read(true).write(true).truncate(false)
            }
        };
        let mut file = options.open(&self.path)?;
        FileExt::lock_exclusive(&file)?;
        let prepared = match mode {
            OpenMode::Append | OpenMode::Update => terminate_last_line(&mut file),
            // Truncate only once the lock is held so a concurrent appender
            // never loses a line written between open and lock.
            OpenMode::Truncate => file
                .set_len(0)
                .and_then(|_| file.seek(SeekFrom::Start(0)))
                .map(|_| ()),
        };
        if let Err(e) = prepared {
            let _ = FileExt::unlock(&file);
            return Err(e);
        }
        trace!(target: "tsvkv::gate", path = %self.path.display(), ?mode, "File locked");

        Ok(GateGuard {
            writer: Some(BufWriter::new(file)),
            encoding: self.encoding,
            path: &self.path,
            _lock: guard,
        })
    }
}

/// Add a newline if the file ends in a torn line.
fn terminate_last_line(file: &mut File) -> io::Result<()> {
    if file.seek(SeekFrom::End(0))? == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Exclusive write session on the gated file.
pub struct GateGuard<'a> {
    writer: Option<BufWriter<File>>,
    encoding: Encoding,
    path: &'a Path,
    _lock: MutexGuard<'a, ()>,
}

impl GateGuard<'_> {
    /// Write `line` followed by `\n`
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let bytes = self.encoding.encode(line);
        let writer = self.writer()?;
        writer.write_all(&bytes)?;
        writer.write_all(b"\n")
    }

    /// Flush buffered lines to the OS
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }

    /// Flush and fsync file data
    pub fn sync(&mut self) -> io::Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_data()
    }

    /// Whole file content, read through the locked handle.
    ///
    /// Buffered lines are flushed first; writing resumes at the end.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let writer = self.writer()?;
        writer.flush()?;
        let file = writer.get_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Drop the file content; later writes start at offset zero.
    pub fn truncate(&mut self) -> io::Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        let file = writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "gate already released"))
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
            let file = writer.get_ref();
            let _ = FileExt::unlock(file);
            trace!(target: "tsvkv::gate", path = %self.path.display(), "File unlocked");
        }
        // _lock is released after this body returns
    }
}
