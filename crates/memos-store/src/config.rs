//! Store configuration.
//!
//! [`StoreConfig`] controls where the database lives, the SQLite pragmas
//! applied to each connection, and how hard short-ID allocation tries
//! before giving up. Defaults come from the [`Default`] implementation;
//! values can be overridden fluently or loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};

/// Default ceiling on short-ID allocation attempts per create.
pub const DEFAULT_MAX_SHORT_ID_ATTEMPTS: u32 = 1_000;

/// Database location, connection pragmas, and allocation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    ///
    /// Default: **`data/memos.db`**.
    pub database_path: PathBuf,

    /// How long a writer waits on a locked database, in milliseconds.
    ///
    /// Default: **5 000 ms**.
    pub busy_timeout_ms: u32,

    /// Memory-mapped I/O window, in bytes.
    ///
    /// Default: **256 MiB**.
    pub mmap_size_bytes: i64,

    /// Page cache size, in KiB.
    ///
    /// Default: **64 000 KiB**.
    pub cache_size_kib: u32,

    /// Maximum short-ID candidates tried per create. `None` retries until
    /// the caller cancels.
    ///
    /// Default: **1 000**.
    pub max_short_id_attempts: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/memos.db"),
            busy_timeout_ms: 5_000,
            mmap_size_bytes: 268_435_456,
            cache_size_kib: 64_000,
            max_short_id_attempts: Some(DEFAULT_MAX_SHORT_ID_ATTEMPTS),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;

        info!(path = %path.display(), "store config loaded");
        Ok(config)
    }

    /// Set the database file path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Set the busy timeout (in milliseconds).
    pub fn with_busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Set the short-ID attempt ceiling; `None` removes it.
    pub fn with_max_short_id_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_short_id_attempts = attempts;
        self
    }
}
