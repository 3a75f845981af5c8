//! Line codec
//!
//! One record per line, fields separated by a tab, every line terminated by
//! `\n`. Lines starting with `#` are comments. A line holding only a key, or
//! a key followed by empty fields, is a tombstone.

use tsvkv_core::{is_tombstone_fields, Arity, Entry, Record};

/// Field separator
pub const FIELD_SEPARATOR: char = '\t';

/// Comment marker; must be the first non-blank character of the line
pub const COMMENT_MARKER: char = '#';

/// Classification of one decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Blank line or comment
    Skip,
    /// Deletion marker for this key
    Tombstone(String),
    /// Candidate record; arity not yet checked
    Fields(Vec<String>),
}

/// Split a decoded line into trimmed fields.
///
/// Only line terminators and NUL padding are stripped from the line itself;
/// tabs are kept so trailing empty fields survive.
pub fn parse_line(line: &str, arity: Arity) -> ParsedLine {
    let line = line.trim_matches(|c: char| c == '\n' || c == '\r' || c == '\0');
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
        return ParsedLine::Skip;
    }
    let fields: Vec<String> = line
        .split(FIELD_SEPARATOR)
        .map(|f| f.trim().to_string())
        .collect();
    if fields[0].is_empty() {
        return ParsedLine::Skip;
    }
    // A single-column store has no room for an all-empty tail, so its
    // tombstone is the key plus one empty field.
    let is_tombstone = match arity {
        Arity::Fixed(1) => fields.len() > 1 && is_tombstone_fields(&fields),
        _ => is_tombstone_fields(&fields),
    };
    if is_tombstone {
        let mut fields = fields;
        return ParsedLine::Tombstone(fields.swap_remove(0));
    }
    ParsedLine::Fields(fields)
}

/// Encode a record as one line without the trailing newline.
pub fn encode_record(record: &Record) -> String {
    record.fields().join("\t")
}

/// Encode an append-protocol entry as one line without the trailing newline.
pub fn encode_entry(entry: &Entry, arity: Arity) -> String {
    match entry {
        Entry::Insert(record) => encode_record(record),
        Entry::Delete(key) => encode_tombstone(key, arity),
    }
}

/// Tombstone line for `key` under the given arity.
pub fn encode_tombstone(key: &str, arity: Arity) -> String {
    let empty_fields = match arity {
        Arity::Fixed(1) => 1,
        Arity::Fixed(n) => n - 1,
        Arity::Unset => 0,
    };
    let mut line = String::with_capacity(key.len() + empty_fields);
    line.push_str(key);
    for _ in 0..empty_fields {
        line.push(FIELD_SEPARATOR);
    }
    line
}

/// Lowercase and drop spaces, for the header prefix check.
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "")
}

/// Whether the first line of a file satisfies the configured header.
pub fn header_matches(found: &str, expected: &str) -> bool {
    let found = found.trim_matches(|c: char| c == '\n' || c == '\r' || c == '\0');
    normalize_header(found).starts_with(&normalize_header(expected))
}
