//! Tail-only read
//!
//! Finds the last valid record of a file without replaying all of it. The
//! file is scanned backward in fixed-size chunks; a partial line at the front
//! of a chunk is carried over and completed by the next (earlier) chunk.
//!
//! The result equals the last entry of a full load as long as no later
//! tombstone deletes that key.

use crate::codec::{header_matches, parse_line, ParsedLine};
use crate::loader::{ensure_exists, LoadOptions};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;
use tsvkv_core::{Arity, Record, StoreError, StoreResult};

/// Chunk size of the backward scan.
pub const TAIL_CHUNK_SIZE: usize = 8 * 1024;

/// Last valid, non-tombstone record of the file, if any.
pub fn read_last_record(path: &Path, opts: &LoadOptions) -> StoreResult<Option<Record>> {
    read_last_record_with_chunk(path, opts, TAIL_CHUNK_SIZE)
}

/// [`read_last_record`] with an explicit chunk size.
pub fn read_last_record_with_chunk(
    path: &Path,
    opts: &LoadOptions,
    chunk_size: usize,
) -> StoreResult<Option<Record>> {
    ensure_exists(path, opts)?;
    let mut file = File::open(path)?;
    let (data_start, arity) = probe_layout(&mut file, opts)?;
    let Arity::Fixed(arity) = arity else {
        return Ok(None);
    };

    let chunk_size = chunk_size.max(1) as u64;
    let mut pos = file.metadata()?.len();
    let mut carry: Vec<u8> = Vec::new();
    let mut chunk: Vec<u8> = Vec::new();

    while pos > data_start {
        let start = pos.saturating_sub(chunk_size).max(data_start);
        chunk.resize((pos - start) as usize, 0);
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&carry);

        // Everything after a newline in this buffer is a complete line.
        let mut end = chunk.len();
        while let Some(nl) = chunk[..end].iter().rposition(|b| *b == b'\n') {
            if let Some(record) = evaluate(&chunk[nl + 1..end], arity, opts) {
                trace!(
                    target: "tsvkv::tail",
                    path = %path.display(),
                    offset = start + nl as u64 + 1,
                    "Found last record"
                );
                return Ok(Some(record));
            }
            end = nl;
        }
        carry = chunk[..end].to_vec();
        pos = start;
    }

    // The carry now starts at the first data line.
    Ok(evaluate(&carry, arity, opts))
}

/// Skip the header and work out the arity.
///
/// Returns the offset of the first data byte and the arity a full load would
/// use (header column count, else the first data line's field count).
pub fn probe_layout(file: &mut File, opts: &LoadOptions) -> StoreResult<(u64, Arity)> {
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut data_start = 0u64;
    let mut arity = opts.header_arity();

    if let Some(header) = opts.header.as_deref() {
        let n = reader.read_until(b'\n', &mut buf)?;
        if n > 0 {
            let first = opts.encoding.decode(&buf).unwrap_or_default();
            if header_matches(&first, header) {
                data_start = n as u64;
            } else if opts.verify_header {
                return Err(StoreError::header_mismatch(header, first.trim_end()));
            }
        }
    }

    if arity == Arity::Unset {
        reader.seek(SeekFrom::Start(data_start))?;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let Some(line) = opts.encoding.decode(&buf) else {
                continue;
            };
            if let ParsedLine::Fields(fields) = parse_line(&line, Arity::Unset) {
                arity = Arity::Fixed(fields.len());
                break;
            }
        }
    }

    Ok((data_start, arity))
}

/// Parse one raw line the way the loader would; `Some` only for a live record.
fn evaluate(bytes: &[u8], arity: usize, opts: &LoadOptions) -> Option<Record> {
    let line = opts.encoding.decode(bytes)?;
    let ParsedLine::Fields(fields) = parse_line(&line, Arity::Fixed(arity)) else {
        return None;
    };
    let record = Record::new(fields);
    if record.len() == arity {
        return Some(record);
    }
    if opts.strict_arity {
        return None;
    }
    let record = record.fit_to_arity(arity);
    if record.is_tombstone() && arity > 1 {
        None
    } else {
        Some(record)
    }
}
