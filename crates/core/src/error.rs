//! Error types for tsvkv
//!
//! This module defines all error types used throughout the store.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Initialization failures (`FileNotFound`, `HeaderMismatch`) are fatal and
//! returned synchronously from open. Steady-state I/O failures inside the
//! sync worker never reach the caller; they flip the store into the desynced
//! state instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error types for the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// File missing and creation disabled
    #[error("File not found: {}", path.display())]
    FileNotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// First line of the file does not match the configured header
    #[error("Header mismatch: expected {expected:?}, found {found:?}")]
    HeaderMismatch {
        /// Configured header
        expected: String,
        /// First line read from the file
        found: String,
    },

    /// Record arity does not match the established column count
    #[error("Data format error: expected {expected} columns, got {actual}")]
    FormatError {
        /// Established arity
        expected: usize,
        /// Field count of the rejected record
        actual: usize,
    },

    /// Key is empty after trimming
    #[error("Key cannot be empty")]
    EmptyKey,

    /// I/O error (file operations, locking)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Last disk operation failed and no successful rewrite has happened since
    #[error("Store at {} is desynced from disk", path.display())]
    Desynced {
        /// Backing file
        path: PathBuf,
    },

    /// Configuration could not be read or validated
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Create a header mismatch error
    pub fn header_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        StoreError::HeaderMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        StoreError::InvalidConfig(msg.into())
    }

    /// Whether this error is fatal for open (as opposed to a per-call rejection)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::FileNotFound { .. }
                | StoreError::HeaderMismatch { .. }
                | StoreError::Io(_)
                | StoreError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_file_not_found() {
        let err = StoreError::FileNotFound {
            path: PathBuf::from("/tmp/missing.tsv"),
        };
        let msg = err.to_string();
        assert!(msg.contains("File not found"));
        assert!(msg.contains("missing.tsv"));
    }

    #[test]
    fn test_error_display_header_mismatch() {
        let err = StoreError::header_mismatch("id\tname", "key\tvalue");
        let msg = err.to_string();
        assert!(msg.contains("Header mismatch"));
        assert!(msg.contains("id\\tname"));
    }

    #[test]
    fn test_error_display_format() {
        let err = StoreError::FormatError {
            expected: 3,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("got 5"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_per_call_errors_not_fatal() {
        assert!(!StoreError::EmptyKey.is_fatal());
        assert!(!StoreError::FormatError {
            expected: 2,
            actual: 3
        }
        .is_fatal());
    }
}
