// config.rs - Engine configuration.
//
// LogConfig decides where partitions live and how long appenders and
// followers wait. It can be built in code (`for_dir`) or loaded from a TOML
// file; any key missing from the file takes its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// Which lock provider the engine uses for appends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// OS exclusive file lock; also excludes other processes.
    #[default]
    File,
    /// In-process lock only.
    Memory,
}

/// Configuration for a [`crate::ChainLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding one `<partition>.jsonl` file per partition.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Longest an append waits for the partition lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// How often follow mode checks for new entries.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub lock_provider: LockKind,

    /// Call `sync_data` after every append.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            lock_provider: LockKind::default(),
            fsync: default_fsync(),
        }
    }
}

// Serde default functions
fn default_base_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_fsync() -> bool {
    true
}

impl LogConfig {
    /// Defaults with partitions stored under `base_dir`.
    pub fn for_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, LogError> {
        let content = std::fs::read_to_string(path).map_err(|e| LogError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| LogError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load config if the file exists, otherwise return defaults.
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, LogError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero interval would turn follow into a busy loop.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
