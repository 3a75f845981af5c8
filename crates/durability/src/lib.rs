//! Durability layer for tsvkv
//!
//! This crate handles everything that writes the backing file:
//!
//! - FileGate: in-process mutex + OS advisory lock around every write
//! - AppendQueue: lines waiting for the sync worker
//! - rewrite: wholesale compaction of the file from memory, optionally
//!   merged with a locked re-read (RewriteSession)
//! - append: one-shot locked append for writers without an open store
//! - FaultInjector: deterministic I/O failures for crash tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod append;
pub mod gate;
pub mod queue;
pub mod rewrite;

pub use append::{append_delete, append_record, AppendOptions};
pub use gate::{FaultInjector, FileGate, GateGuard, OpenMode};
pub use queue::AppendQueue;
pub use rewrite::{rewrite_file, truncate_to_header, RewriteSession};
