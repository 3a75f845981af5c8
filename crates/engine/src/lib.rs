//! Store engine for tsvkv
//!
//! This crate ties the lower layers together:
//! - Store: open/get/set/delete/clear/close over one backing file
//! - Sync worker: drains the append queue and compacts the file
//! - Builder: fluent options, `tsvkv.toml` config
//!
//! The engine is the only component that knows about:
//! - The state lock and its ordering against the file gate
//! - When a dirty store gets compacted
//! - Reconciling with appends made by other processes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod store;
mod worker;

pub use builder::StoreBuilder;
pub use store::Store;
pub use worker::WORKER_THREAD_NAME;
