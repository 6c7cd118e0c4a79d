//! # chainlog
//!
//! Append-only, hash-chained, partitioned event log.
//!
//! Every partition is a JSONL (JSON Lines) file of [`Entry`] records. Each
//! entry carries the SHA-256 hash of its predecessor, so editing, deleting,
//! inserting or reordering entries is detected by [`ChainLog::verify`].
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use chainlog::{ChainLog, LogConfig};
//! use serde_json::json;
//!
//! let log = ChainLog::open(LogConfig::for_dir("/tmp/events")).unwrap();
//! let first = log.append("users", json!({"user": "alice"})).unwrap();
//! assert_eq!(first.seq, 0);
//! assert!(log.verify("users").unwrap().valid);
//! ```
//!
//! ## Guarantees and gaps
//!
//! - Appends to one partition are serialized by a per-partition lock
//!   ([`LockProvider`]); different partitions never contend.
//! - Readers, verification and follow mode take no lock and only ever see
//!   complete lines.
//! - A process crash in the middle of a write can leave a torn final line.
//!   It is hidden from readers, and further appends fail with
//!   [`LogError::TornTail`] until an operator repairs the file.

pub mod config;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod lock;
pub mod log;
pub mod reader;
pub mod store;
pub mod verify;

pub use config::{LockKind, LogConfig};
pub use entry::{decode, encode, Entry};
pub use error::LogError;
pub use hasher::{compute_hash, GENESIS_HASH};
pub use lock::{FileLockProvider, LockProvider, MemoryLockProvider, PartitionLock};
pub use log::ChainLog;
pub use reader::{CancellationToken, EntryReader, Follower};
pub use store::{PartitionHandle, PartitionStore};
pub use verify::{ChainViolation, VerifyResult, ViolationKind};
