//! File loader
//!
//! Replays a delimited file into an [`OrderedRecords`] mapping:
//!
//! 1. Optional header line, verified as a case/space-insensitive prefix match
//! 2. Arity taken from the header, else from the first data line
//! 3. Tombstones delete, records insert at the end (last occurrence wins)
//! 4. Lines of the wrong arity are dropped (strict) or padded/truncated
//!
//! Malformed lines never abort a load; only a header mismatch does.

use crate::codec::{header_matches, parse_line, ParsedLine};
use crate::ordered::OrderedRecords;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, info, trace, warn};
use tsvkv_core::{Arity, Encoding, Record, StoreError, StoreOptions, StoreResult};

/// Options controlling a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Configured header (tab-separated), if any
    pub header: Option<String>,
    /// Fail on a header mismatch
    pub verify_header: bool,
    /// Drop instead of pad/truncate lines of the wrong arity
    pub strict_arity: bool,
    /// Create the file (with header) when missing
    pub create_if_missing: bool,
    /// File encoding
    pub encoding: Encoding,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            header: None,
            verify_header: true,
            strict_arity: true,
            create_if_missing: true,
            encoding: Encoding::Utf8,
        }
    }
}

impl LoadOptions {
    /// Derive load options from store options and a header.
    pub fn from_store(header: Option<&str>, opts: &StoreOptions) -> Self {
        Self {
            header: clean_header(header),
            verify_header: opts.verify_header,
            strict_arity: opts.strict_arity,
            create_if_missing: opts.create_if_missing,
            encoding: opts.encoding,
        }
    }

    /// Arity fixed by the header, if one is configured
    pub fn header_arity(&self) -> Arity {
        Arity::from_header(self.header.as_deref())
    }
}

/// Trim a configured header; blank means no header.
pub fn clean_header(header: Option<&str>) -> Option<String> {
    header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Counters collected during a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Lines read after the header
    pub lines_read: usize,
    /// Blank and comment lines
    pub skipped: usize,
    /// Tombstone lines applied
    pub tombstones: usize,
    /// Lines of the wrong arity dropped in strict mode
    pub dropped: usize,
    /// Lines of the wrong arity padded/truncated in lenient mode
    pub normalized: usize,
    /// Lines that could not be decoded
    pub undecodable: usize,
}

/// Result of a load.
#[derive(Debug, Clone)]
pub struct Loaded {
    /// Replayed records in file order
    pub records: OrderedRecords,
    /// Arity in effect after the load
    pub arity: Arity,
    /// Load counters
    pub stats: LoadStats,
}

/// Replay a file from any buffered reader.
pub fn load_from_reader<R: BufRead>(mut reader: R, opts: &LoadOptions) -> StoreResult<Loaded> {
    let mut records = OrderedRecords::new();
    let mut stats = LoadStats::default();
    let mut arity = opts.header_arity();
    let mut buf = Vec::new();

    let mut pending_first: Option<String> = None;
    if let Some(header) = opts.header.as_deref() {
        if reader.read_until(b'\n', &mut buf)? > 0 {
            let first = opts.encoding.decode(&buf).unwrap_or_default();
            trace!(target: "tsvkv::loader", header, first = first.trim_end(), "Checking header");
            if !header_matches(&first, header) {
                if opts.verify_header {
                    return Err(StoreError::header_mismatch(header, first.trim_end()));
                }
                pending_first = Some(first);
            }
        }
    }

    let mut apply = |line: &str, arity: &mut Arity, stats: &mut LoadStats| {
        stats.lines_read += 1;
        match parse_line(line, *arity) {
            ParsedLine::Skip => stats.skipped += 1,
            ParsedLine::Tombstone(key) => {
                stats.tombstones += 1;
                records.remove(&key);
            }
            ParsedLine::Fields(fields) => {
                let expected = match *arity {
                    Arity::Fixed(n) => n,
                    Arity::Unset => {
                        debug!(target: "tsvkv::loader", arity = fields.len(), "Detected arity");
                        *arity = Arity::Fixed(fields.len());
                        fields.len()
                    }
                };
                let record = Record::new(fields);
                if record.len() == expected {
                    records.push_back(record);
                } else if opts.strict_arity {
                    warn!(
                        target: "tsvkv::loader",
                        expected,
                        actual = record.len(),
                        line = line.trim_end(),
                        "Ignoring line with wrong column count"
                    );
                    stats.dropped += 1;
                } else {
                    stats.normalized += 1;
                    let record = record.fit_to_arity(expected);
                    if record.is_tombstone() && expected > 1 {
                        records.remove(record.key());
                    } else {
                        records.push_back(record);
                    }
                }
            }
        }
    };

    if let Some(first) = pending_first {
        apply(&first, &mut arity, &mut stats);
    }

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        match opts.encoding.decode(&buf) {
            Some(line) => apply(&line, &mut arity, &mut stats),
            None => {
                warn!(target: "tsvkv::loader", bytes = buf.len(), "Ignoring undecodable line");
                stats.undecodable += 1;
            }
        }
    }

    Ok(Loaded {
        records,
        arity,
        stats,
    })
}

/// Make sure the file exists, creating it with the header when allowed.
///
/// Returns true when the file was created.
pub fn ensure_exists(path: &Path, opts: &LoadOptions) -> StoreResult<bool> {
    if path.is_file() {
        return Ok(false);
    }
    if !opts.create_if_missing {
        warn!(target: "tsvkv::loader", path = %path.display(), "File not found");
        return Err(StoreError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            if let Some(header) = opts.header.as_deref() {
                file.write_all(&opts.encoding.encode(header))?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
            info!(target: "tsvkv::loader", path = %path.display(), "Created");
            Ok(true)
        }
        // Another writer created it between the check and the open
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Load a file from disk, creating it first if allowed.
pub fn load_file(path: &Path, opts: &LoadOptions) -> StoreResult<Loaded> {
    ensure_exists(path, opts)?;
    let file = File::open(path)?;
    let loaded = load_from_reader(BufReader::new(file), opts)?;
    debug!(
        target: "tsvkv::loader",
        path = %path.display(),
        records = loaded.records.len(),
        arity = ?loaded.arity,
        lines = loaded.stats.lines_read,
        tombstones = loaded.stats.tombstones,
        dropped = loaded.stats.dropped,
        normalized = loaded.stats.normalized,
        "Loaded"
    );
    Ok(loaded)
}
