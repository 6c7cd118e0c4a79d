// error.rs - Error types for the log engine.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Chain violations found by `verify` are not errors: they are reported as
// data inside `VerifyResult` (see verify.rs).

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// A stored line is not a well-formed entry.
    #[error("malformed entry at line {line}: {source}")]
    Decode {
        line: usize,
        source: serde_json::Error,
    },

    /// The last line of a partition, read to continue or report the chain,
    /// is not a well-formed entry.
    #[error("malformed last entry in partition '{partition}': {source}")]
    DecodeLast {
        partition: String,
        source: serde_json::Error,
    },

    /// The timestamp cannot be written in the stored `YYYY-MM-DD...` layout.
    #[error("timestamp {timestamp} is outside the storable range (years 0000 to 9999)")]
    TimestampOutOfRange { timestamp: DateTime<Utc> },

    /// An I/O operation on the backing store failed.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The partition name cannot be mapped to a backing file.
    #[error("invalid partition name {name:?}: {reason}")]
    InvalidPartitionName { name: String, reason: &'static str },

    /// The partition ends with an unterminated record, most likely from a
    /// crash during a previous append. Appending after it would corrupt the
    /// next line, so the engine refuses.
    #[error("partition '{partition}' ends with an incomplete record at byte {offset}")]
    TornTail { partition: String, offset: u64 },

    /// The operation targets a partition that does not exist.
    #[error("partition '{0}' not found")]
    NotFound(String),

    /// The append lock for the partition could not be acquired in time.
    #[error("timed out after {waited:?} waiting for the lock on partition '{partition}'")]
    LockTimeout { partition: String, waited: Duration },

    /// Failed to serialize an entry or payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or parse the configuration file.
    #[error("invalid config at {path}: {message}")]
    Config { path: PathBuf, message: String },
}

impl LogError {
    /// Wrap an `io::Error` with the path it happened on.
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LogError::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the backing store (the StorageError family).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            LogError::Storage { .. }
                | LogError::InvalidPartitionName { .. }
                | LogError::TornTail { .. }
        )
    }
}
