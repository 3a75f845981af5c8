//! Store open options
//!
//! [`StoreOptions`] carries every knob accepted by open. The defaults match
//! the behaviour an embedding application gets without configuring anything:
//! create the file if missing, verify the header, compact once on load, and
//! poll the append queue every 10ms.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest poll delay the sync worker accepts.
pub const MIN_POLL_DELAY: Duration = Duration::from_micros(10);

/// Default poll delay of the sync worker.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(10);

/// Text encoding of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8; data lines that fail to decode are treated as malformed
    #[default]
    Utf8,
    /// ISO-8859-1; every byte maps to one char, unencodable chars become `?`
    Latin1,
}

impl Encoding {
    /// Parse the config-file spelling of an encoding
    pub fn parse(name: &str) -> Option<Self> {
        let folded: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "utf8" => Some(Encoding::Utf8),
            "latin1" | "iso88591" => Some(Encoding::Latin1),
            _ => None,
        }
    }

    /// Decode one raw line. Returns `None` when the bytes are not valid.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Encode text for writing.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Options accepted by open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Create the file (with header) when missing; otherwise open fails
    pub create_if_missing: bool,
    /// Require the first line to prefix-match the configured header
    pub verify_header: bool,
    /// Compact the file right after loading it
    pub rewrite_on_load: bool,
    /// Compact the file on close instead of only draining the queue
    pub rewrite_on_close: bool,
    /// Minimum age of the file before a dirty store is compacted.
    /// Zero disables timed compaction.
    pub rewrite_interval: Duration,
    /// Sleep between sync worker iterations
    pub poll_delay: Duration,
    /// Drop (strict) or pad/truncate (lenient) lines of the wrong arity
    pub strict_arity: bool,
    /// Reload the file before compacting so other writers' appends survive
    pub monitor_external_changes: bool,
    /// File encoding
    pub encoding: Encoding,
    /// Keep mutations in memory only; nothing is queued for disk
    pub memory_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            verify_header: true,
            rewrite_on_load: true,
            rewrite_on_close: false,
            rewrite_interval: Duration::ZERO,
            poll_delay: DEFAULT_POLL_DELAY,
            strict_arity: true,
            monitor_external_changes: true,
            encoding: Encoding::Utf8,
            memory_only: false,
        }
    }
}

impl StoreOptions {
    /// Poll delay clamped to [`MIN_POLL_DELAY`]
    pub fn effective_poll_delay(&self) -> Duration {
        self.poll_delay.max(MIN_POLL_DELAY)
    }

    /// Options for tests: no compaction on load, fast polling.
    pub fn for_testing() -> Self {
        Self {
            rewrite_on_load: false,
            poll_delay: Duration::from_millis(1),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = StoreOptions::default();
        assert!(opts.create_if_missing);
        assert!(opts.verify_header);
        assert!(opts.rewrite_on_load);
        assert!(!opts.rewrite_on_close);
        assert_eq!(opts.rewrite_interval, Duration::ZERO);
        assert_eq!(opts.poll_delay, Duration::from_millis(10));
        assert_eq!(opts.encoding, Encoding::Utf8);
    }

    #[test]
    fn poll_delay_is_clamped() {
        let opts = StoreOptions {
            poll_delay: Duration::ZERO,
            ..StoreOptions::default()
        };
        assert_eq!(opts.effective_poll_delay(), MIN_POLL_DELAY);
    }

    #[test]
    fn encoding_parse() {
        assert_eq!(Encoding::parse("UTF-8"), Some(Encoding::Utf8));
        assert_eq!(Encoding::parse("latin1"), Some(Encoding::Latin1));
        assert_eq!(Encoding::parse("iso-8859-1"), Some(Encoding::Latin1));
        assert_eq!(Encoding::parse("ebcdic"), None);
    }

    #[test]
    fn latin1_maps_bytes_one_to_one() {
        let text = Encoding::Latin1.decode(&[b'a', 0xE9, b'\t']).unwrap();
        assert_eq!(text, "a\u{e9}\t");
        assert_eq!(Encoding::Latin1.encode(&text), vec![b'a', 0xE9, b'\t']);
        assert_eq!(Encoding::Latin1.encode("\u{4e2d}"), vec![b'?']);
    }

    #[test]
    fn utf8_rejects_invalid_bytes() {
        assert!(Encoding::Utf8.decode(&[0xFF, 0xFE]).is_none());
        assert_eq!(Encoding::Utf8.decode("héllo".as_bytes()).unwrap(), "héllo");
    }
}
