//! Standalone append
//!
//! One-shot writer for processes that do not keep a store open: open the
//! file, take the advisory lock, check the header, fit the record to the
//! file's arity, make sure the file ends in a newline, append, close.
//!
//! It takes the same OS lock as the [`FileGate`](crate::gate::FileGate), so
//! it never interleaves with a store's drain or compaction. A store that
//! monitors external changes picks the line up on its next reload.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;
use tsvkv_core::{Arity, Encoding, Record, StoreError, StoreResult};
use tsvkv_storage::{
    clean_header, encode_record, encode_tombstone, ensure_exists, probe_layout, LoadOptions,
};

/// Options for [`append_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOptions {
    /// Create the file (with header) when missing
    pub create_if_missing: bool,
    /// Require the first line to match the header
    pub verify_header: bool,
    /// File encoding
    pub encoding: Encoding,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            verify_header: true,
            encoding: Encoding::Utf8,
        }
    }
}

impl AppendOptions {
    fn load_options(&self, header: Option<&str>) -> LoadOptions {
        LoadOptions {
            header: clean_header(header),
            verify_header: self.verify_header,
            strict_arity: true,
            create_if_missing: self.create_if_missing,
            encoding: self.encoding,
        }
    }
}

/// Append one record to `path`.
///
/// `fields` are normalized like a store `set`: trimmed, key prepended when
/// field 0 is not the key. The record is then padded or truncated to the
/// header's column count, else to the first data line's field count. Returns
/// the record as written.
pub fn append_record<S: AsRef<str>>(
    path: &Path,
    header: Option<&str>,
    key: &str,
    fields: &[S],
    opts: &AppendOptions,
) -> StoreResult<Record> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }
    let record = Record::normalized(key, fields);
    let load_opts = opts.load_options(header);
    with_locked_file(path, &load_opts, |file, arity| {
        let arity = arity.get().unwrap_or(record.len());
        let record = record.fit_to_arity(arity);
        write_line_at_end(file, &encode_record(&record), opts.encoding)?;
        Ok(record)
    })
}

/// Append a tombstone for `key` to `path`.
pub fn append_delete(
    path: &Path,
    header: Option<&str>,
    key: &str,
    opts: &AppendOptions,
) -> StoreResult<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }
    let load_opts = opts.load_options(header);
    with_locked_file(path, &load_opts, |file, arity| {
        write_line_at_end(file, &encode_tombstone(key, arity), opts.encoding)
    })
}

fn with_locked_file<T>(
    path: &Path,
    opts: &LoadOptions,
    op: impl FnOnce(&mut File, Arity) -> StoreResult<T>,
) -> StoreResult<T> {
    ensure_exists(path, opts)?;
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    FileExt::lock_exclusive(&file)?;
    let result = probe_layout(&mut file, opts).and_then(|(_, arity)| op(&mut file, arity));
    let _ = FileExt::unlock(&file);
    if result.is_ok() {
        debug!(target: "tsvkv::append", path = %path.display(), "Appended");
    }
    result
}

fn write_line_at_end(file: &mut File, line: &str, encoding: Encoding) -> StoreResult<()> {
    let len = file.seek(SeekFrom::End(0))?;
    let mut out = Vec::with_capacity(line.len() + 2);
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            out.push(b'\n');
        }
    }
    out.extend_from_slice(&encoding.encode(line));
    out.push(b'\n');
    file.seek(SeekFrom::End(0))?;
    file.write_all(&out)?;
    file.sync_data()?;
    Ok(())
}
