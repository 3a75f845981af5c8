//! Store configuration via `tsvkv.toml`
//!
//! An embedding application can keep its store settings in a small TOML file
//! next to the data file instead of hard-coding [`StoreOptions`]. Durations
//! are written in human units (seconds for compaction, milliseconds for
//! polling).

use crate::error::{StoreError, StoreResult};
use crate::options::{Encoding, StoreOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "tsvkv.toml";

/// Store configuration loaded from `tsvkv.toml`.
///
/// # Example
///
/// ```toml
/// header = "id\tauthor\tbody"
/// rewrite_interval_secs = 300
/// poll_delay_ms = 10
/// encoding = "utf8"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Expected header line (tab-separated column names)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Create the data file when missing
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// Verify the header on every load
    #[serde(default = "default_true")]
    pub verify_header: bool,
    /// Compact right after loading
    #[serde(default = "default_true")]
    pub rewrite_on_load: bool,
    /// Compact on close
    #[serde(default)]
    pub rewrite_on_close: bool,
    /// Compaction interval in seconds (0 disables timed compaction)
    #[serde(default)]
    pub rewrite_interval_secs: u64,
    /// Sync worker poll delay in milliseconds
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    /// Reject (true) or pad/truncate (false) lines of the wrong arity
    #[serde(default = "default_true")]
    pub strict_arity: bool,
    /// Reload before compacting to keep other writers' appends
    #[serde(default = "default_true")]
    pub monitor_external_changes: bool,
    /// `"utf8"` or `"latin1"`
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_true() -> bool {
    true
}

fn default_poll_delay_ms() -> u64 {
    10
}

fn default_encoding() -> String {
    "utf8".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            header: None,
            create_if_missing: true,
            verify_header: true,
            rewrite_on_load: true,
            rewrite_on_close: false,
            rewrite_interval_secs: 0,
            poll_delay_ms: default_poll_delay_ms(),
            strict_arity: true,
            monitor_external_changes: true,
            encoding: default_encoding(),
        }
    }
}

impl StoreConfig {
    /// Parse the encoding string.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding is not one of the supported spellings.
    pub fn encoding(&self) -> StoreResult<Encoding> {
        Encoding::parse(&self.encoding).ok_or_else(|| {
            StoreError::invalid_config(format!(
                "Invalid encoding '{}' in {}. Expected \"utf8\" or \"latin1\".",
                self.encoding, CONFIG_FILE_NAME
            ))
        })
    }

    /// Convert into open options.
    pub fn to_options(&self) -> StoreResult<StoreOptions> {
        Ok(StoreOptions {
            create_if_missing: self.create_if_missing,
            verify_header: self.verify_header,
            rewrite_on_load: self.rewrite_on_load,
            rewrite_on_close: self.rewrite_on_close,
            rewrite_interval: Duration::from_secs(self.rewrite_interval_secs),
            poll_delay: Duration::from_millis(self.poll_delay_ms),
            strict_arity: self.strict_arity,
            monitor_external_changes: self.monitor_external_changes,
            encoding: self.encoding()?,
            memory_only: false,
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# tsvkv store configuration
#
# Expected header line; tab-separated column names.
# header = "id\tauthor\tbody"

create_if_missing = true
verify_header = true

# Compact the file once after loading / once on close.
rewrite_on_load = true
rewrite_on_close = false

# Compact a dirty store once the file is older than this many seconds.
# 0 disables timed compaction.
rewrite_interval_secs = 0

# Sync worker poll delay in milliseconds.
poll_delay_ms = 10

# true = drop lines with the wrong column count, false = pad/truncate them
strict_arity = true

# Reload the file before compacting so appends by other processes survive.
monitor_external_changes = true

# "utf8" or "latin1"
encoding = "utf8"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::invalid_config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            StoreError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.encoding()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> StoreResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> StoreResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            StoreError::invalid_config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
