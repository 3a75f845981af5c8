//! Record, entry and arity types
//!
//! A [`Record`] is an ordered list of string fields where field 0 is the key.
//! Every record held by one store has the same field count, its [`Arity`].
//!
//! Appends to the backing file are modelled explicitly as [`Entry`] values.
//! A deletion is `Entry::Delete`; only the codec knows that it is written as
//! a key followed by empty fields.

use std::fmt;

/// Ordered list of fields; field 0 is the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record(Vec<String>);

impl Record {
    /// Wrap already-normalized fields.
    ///
    /// Callers must supply at least one field.
    pub fn new(fields: Vec<String>) -> Self {
        debug_assert!(!fields.is_empty(), "record needs a key field");
        Record(fields)
    }

    /// Build a record the way a mutation does: trim every field, sanitize
    /// separators, and prepend `key` unless it is already field 0.
    ///
    /// `key` is expected to be trimmed already.
    pub fn normalized<I, S>(key: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = fields
            .into_iter()
            .map(|f| sanitize_field(f.as_ref()))
            .collect();
        if out.first().map(String::as_str) != Some(key) {
            out.insert(0, key.to_string());
        }
        Record(out)
    }

    /// The key (field 0)
    pub fn key(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// All fields including the key
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    /// Fields after the key
    pub fn values(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Field count
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this record has the shape of a deletion marker
    pub fn is_tombstone(&self) -> bool {
        is_tombstone_fields(&self.0)
    }

    /// Pad with empty fields or truncate so the record has exactly `arity` fields.
    pub fn fit_to_arity(mut self, arity: usize) -> Self {
        let arity = arity.max(1);
        self.0.resize(arity, String::new());
        self
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("\t"))
    }
}

impl From<Vec<String>> for Record {
    fn from(fields: Vec<String>) -> Self {
        Record::new(fields)
    }
}

const LINE_BREAKERS: &[char] = &['\t', '\n', '\r'];

/// Trim a field and replace characters that would break the line format.
pub fn sanitize_field(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(LINE_BREAKERS) {
        trimmed.replace(LINE_BREAKERS, " ")
    } else {
        trimmed.to_string()
    }
}

/// A key alone, or a key followed only by empty fields.
pub fn is_tombstone_fields(fields: &[String]) -> bool {
    fields.len() <= 1 || fields[1..].iter().all(|f| f.is_empty())
}

/// One unit of the append protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Insert or overwrite a record
    Insert(Record),
    /// Delete the record with this key
    Delete(String),
}

impl Entry {
    /// Key the entry applies to
    pub fn key(&self) -> &str {
        match self {
            Entry::Insert(record) => record.key(),
            Entry::Delete(key) => key,
        }
    }
}

/// Column count shared by every record of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arity {
    /// Not yet established: no header and no record seen
    #[default]
    Unset,
    /// Every record has exactly this many fields
    Fixed(usize),
}

impl Arity {
    /// Arity implied by a tab-separated header line; `Unset` when blank
    pub fn from_header(header: Option<&str>) -> Self {
        match header.map(str::trim) {
            Some(h) if !h.is_empty() => Arity::Fixed(h.split('\t').count()),
            _ => Arity::Unset,
        }
    }

    /// The fixed count, if any
    pub fn get(self) -> Option<usize> {
        match self {
            Arity::Unset => None,
            Arity::Fixed(n) => Some(n),
        }
    }

    /// Whether a record with `len` fields is acceptable
    pub fn accepts(self, len: usize) -> bool {
        match self {
            Arity::Unset => true,
            Arity::Fixed(n) => n == len,
        }
    }
}
