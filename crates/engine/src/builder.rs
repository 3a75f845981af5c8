//! Store builder for fluent configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tsvkv_core::{Encoding, StoreConfig, StoreOptions, StoreResult, CONFIG_FILE_NAME};
use tsvkv_durability::FaultInjector;

use crate::store::Store;

// ============================================================================
// Store Builder Pattern
// ============================================================================

/// Builder for [`Store`]
///
/// ```ignore
/// use std::time::Duration;
/// use tsvkv_engine::Store;
///
/// // Defaults: create the file, verify the header, compact on open
/// let store = Store::builder("/data/users.tsv").header("id\tname").open()?;
///
/// // Periodic compaction, no reload before rewriting
/// let store = Store::builder("/data/cache.tsv")
///     .rewrite_interval(Duration::from_secs(60))
///     .monitor_external_changes(false)
///     .open()?;
///
/// // Options from a tsvkv.toml next to the data
/// let store = Store::builder("/data/users.tsv")
///     .config_dir("/data")?
///     .open()?;
/// ```
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    path: PathBuf,
    header: Option<String>,
    options: StoreOptions,
    faults: Option<Arc<FaultInjector>>,
}

impl StoreBuilder {
    /// Builder for `path` with default options
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            header: None,
            options: StoreOptions::default(),
            faults: None,
        }
    }

    /// Expected header line (tab-separated column names)
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Header from column names
    pub fn columns<S: AsRef<str>>(self, columns: &[S]) -> Self {
        let header = columns
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join("\t");
        self.header(header)
    }

    /// Replace all options at once
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply a parsed config; its header, if any, replaces the current one
    pub fn config(mut self, config: &StoreConfig) -> StoreResult<Self> {
        self.options = config.to_options()?;
        if let Some(header) = &config.header {
            self.header = Some(header.clone());
        }
        Ok(self)
    }

    /// Apply `tsvkv.toml` from `dir`, writing the default file first if missing
    pub fn config_dir(self, dir: impl AsRef<Path>) -> StoreResult<Self> {
        let config_path = dir.as_ref().join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&config_path)?;
        let config = StoreConfig::from_file(&config_path)?;
        self.config(&config)
    }

    /// Create the file (with header) when missing
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.options.create_if_missing = create;
        self
    }

    /// Reject files whose first line does not match the header
    pub fn verify_header(mut self, verify: bool) -> Self {
        self.options.verify_header = verify;
        self
    }

    /// Compact once right after loading
    pub fn rewrite_on_load(mut self, rewrite: bool) -> Self {
        self.options.rewrite_on_load = rewrite;
        self
    }

    /// Compact on close instead of only draining
    pub fn rewrite_on_close(mut self, rewrite: bool) -> Self {
        self.options.rewrite_on_close = rewrite;
        self
    }

    /// Minimum file age before a dirty store is compacted; zero disables it
    pub fn rewrite_interval(mut self, interval: Duration) -> Self {
        self.options.rewrite_interval = interval;
        self
    }

    /// Worker sleep between cycles
    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.options.poll_delay = delay;
        self
    }

    /// Drop (rather than pad or truncate) lines of the wrong arity
    pub fn strict_arity(mut self, strict: bool) -> Self {
        self.options.strict_arity = strict;
        self
    }

    /// Reload the file before each compaction
    pub fn monitor_external_changes(mut self, monitor: bool) -> Self {
        self.options.monitor_external_changes = monitor;
        self
    }

    /// File encoding
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.options.encoding = encoding;
        self
    }

    /// Keep mutations in memory only
    pub fn memory_only(mut self, memory_only: bool) -> Self {
        self.options.memory_only = memory_only;
        self
    }

    /// Route every file-gate open through `faults`
    pub fn fault_injector(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Load the file and start the sync worker
    ///
    /// # Errors
    ///
    /// - `FileNotFound` if the file is missing and creation is off
    /// - `HeaderMismatch` if the first line disagrees with the header
    /// - `Io` if the file cannot be created or read
    pub fn open(self) -> StoreResult<Store> {
        Store::open_with(self.path, self.header.as_deref(), self.options, self.faults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_join_with_tabs() {
        let builder = StoreBuilder::new("x.tsv").columns(&["id", "name"]);
        assert_eq!(builder.header.as_deref(), Some("id\tname"));
    }

    #[test]
    fn setters_reach_options() {
        let builder = StoreBuilder::new("x.tsv")
            .rewrite_interval(Duration::from_secs(5))
            .strict_arity(false)
            .memory_only(true);
        assert_eq!(builder.options.rewrite_interval, Duration::from_secs(5));
        assert!(!builder.options.strict_arity);
        assert!(builder.options.memory_only);
    }

    #[test]
    fn config_header_overrides() {
        let config = StoreConfig {
            header: Some("k\tv".into()),
            ..StoreConfig::default()
        };
        let builder = StoreBuilder::new("x.tsv").header("a\tb").config(&config).unwrap();
        assert_eq!(builder.header.as_deref(), Some("k\tv"));
    }

    #[test]
    fn config_dir_writes_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let builder = StoreBuilder::new(dir.path().join("x.tsv"))
            .config_dir(dir.path())
            .unwrap();
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(builder.options, StoreOptions::default());
    }
}
