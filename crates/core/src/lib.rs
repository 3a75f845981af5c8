//! Core types for tsvkv
//!
//! This crate defines the foundational types used throughout the store:
//! - Record: ordered fields, field 0 is the key
//! - Entry: explicit insert/delete unit of the append protocol
//! - Arity: column count shared by all records of a store
//! - StoreError: error type hierarchy
//! - StoreOptions / StoreConfig: open options and their TOML form

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod options;
pub mod record;

pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use error::{StoreError, StoreResult};
pub use options::{Encoding, StoreOptions, DEFAULT_POLL_DELAY, MIN_POLL_DELAY};
pub use record::{is_tombstone_fields, sanitize_field, Arity, Entry, Record};
