//! tsvkv - persistent ordered key-value store over a tab-separated file
//!
//! Each line of the backing file is one record: the key, then the value
//! fields, separated by tabs. Mutations are appended; a background worker
//! periodically compacts the file so it holds only live records.
//!
//! # Quick Start
//!
//! ```ignore
//! use tsvkv::Store;
//!
//! let store = Store::builder("data/users.tsv").header("id\tname\temail").open()?;
//!
//! store.set("u1", ["alice", "alice@example.com"])?;
//! let record = store.get("u1").unwrap();
//! assert_eq!(record.values(), &["alice", "alice@example.com"]);
//!
//! store.close()?;
//! ```
//!
//! # Architecture
//!
//! - [`Store`] keeps every record in memory, in insertion order
//! - Mutations queue a line; the sync worker drains the queue to disk
//! - All writes take an advisory file lock, so cooperating processes (and
//!   [`append_record`]) can share one file
//!
//! The lower layers are also available directly through [`storage`],
//! [`durability`] and [`engine`].

pub use tsvkv_durability as durability;
pub use tsvkv_engine as engine;
pub use tsvkv_storage as storage;

pub use tsvkv_core::{
    Arity, Encoding, Record, StoreConfig, StoreError, StoreOptions, StoreResult, CONFIG_FILE_NAME,
};
pub use tsvkv_durability::{append_delete, append_record, AppendOptions};
pub use tsvkv_engine::{Store, StoreBuilder};
pub use tsvkv_storage::{load_file, read_last_record, LoadOptions, Loaded};
