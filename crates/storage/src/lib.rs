//! Storage layer for tsvkv
//!
//! This crate turns bytes on disk into records in memory:
//! - codec: line format, tombstone convention, header matching
//! - OrderedRecords: insertion-ordered key → record container
//! - loader: full replay of a file with header and arity checks
//! - tail: backward chunked scan for the last valid record
//!
//! Nothing here writes records; see `tsvkv-durability` for that.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod loader;
pub mod ordered;
pub mod tail;

pub use codec::{
    encode_entry, encode_record, encode_tombstone, header_matches, normalize_header, parse_line,
    ParsedLine, COMMENT_MARKER, FIELD_SEPARATOR,
};
pub use loader::{
    clean_header, ensure_exists, load_file, load_from_reader, LoadOptions, LoadStats, Loaded,
};
pub use ordered::OrderedRecords;
pub use tail::{probe_layout, read_last_record, read_last_record_with_chunk, TAIL_CHUNK_SIZE};
