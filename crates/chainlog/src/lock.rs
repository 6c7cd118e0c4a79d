// lock.rs - Per-partition append locks.
//
// Appends to one partition must not interleave. The engine asks a
// LockProvider for an exclusive lock on the partition name and holds the
// returned guard for the whole read-tail/write critical section. Dropping the
// guard releases the lock.
//
// Two providers ship with the crate:
// - FileLockProvider: advisory `flock` on `<base_dir>/<name>.lock`, so it
//   also excludes other processes appending to the same directory.
// - MemoryLockProvider: a set of held names under a mutex, for tests and
//   single-process embeddings.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::{Condvar, Mutex};

use crate::error::LogError;

/// Hands out exclusive per-partition locks with a bounded wait.
pub trait LockProvider: Send + Sync {
    /// Block until the lock on `partition` is held or `timeout` elapses.
    ///
    /// Returns [`LogError::LockTimeout`] on timeout.
    fn acquire(&self, partition: &str, timeout: Duration) -> Result<PartitionLock, LogError>;
}

/// A held partition lock. Released on drop.
pub struct PartitionLock {
    partition: String,
    _guard: Box<dyn Send>,
}

impl PartitionLock {
    /// Wrap a provider-specific guard whose `Drop` releases the lock.
    pub fn new(partition: impl Into<String>, guard: impl Send + 'static) -> Self {
        Self {
            partition: partition.into(),
            _guard: Box::new(guard),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }
}

impl std::fmt::Debug for PartitionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionLock")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Exclusive OS file locks, one lock file per partition.
pub struct FileLockProvider {
    dir: PathBuf,
}

impl FileLockProvider {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn lock_path(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", partition))
    }
}

/// Keeps the locked file open; unlocking on drop is explicit so the lock is
/// released even if the descriptor were duplicated.
struct FileGuard {
    file: File,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release partition file lock: {}", e);
        }
    }
}

impl LockProvider for FileLockProvider {
    fn acquire(&self, partition: &str, timeout: Duration) -> Result<PartitionLock, LogError> {
        let path = self.lock_path(partition);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LogError::storage(&path, source))?;

        let started = Instant::now();
        let mut backoff = Duration::from_millis(1);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(PartitionLock::new(partition, FileGuard { file })),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        tracing::warn!(partition, ?waited, "file lock wait timed out");
                        return Err(LogError::LockTimeout {
                            partition: partition.to_string(),
                            waited,
                        });
                    }
                    thread::sleep(backoff.min(timeout - waited));
                    backoff = (backoff * 2).min(Duration::from_millis(20));
                }
                Err(source) => return Err(LogError::storage(&path, source)),
            }
        }
    }
}

#[derive(Default)]
struct HeldSet {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// In-process locks keyed by partition name.
#[derive(Default, Clone)]
pub struct MemoryLockProvider {
    inner: Arc<HeldSet>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if some caller currently holds the lock on `partition`.
    pub fn is_held(&self, partition: &str) -> bool {
        self.inner.held.lock().contains(partition)
    }
}

struct MemoryGuard {
    inner: Arc<HeldSet>,
    partition: String,
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        self.inner.held.lock().remove(&self.partition);
        self.inner.released.notify_all();
    }
}

impl LockProvider for MemoryLockProvider {
    fn acquire(&self, partition: &str, timeout: Duration) -> Result<PartitionLock, LogError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut held = self.inner.held.lock();
        while held.contains(partition) {
            if self.inner.released.wait_until(&mut held, deadline).timed_out()
                && held.contains(partition)
            {
                let waited = started.elapsed();
                tracing::warn!(partition, ?waited, "memory lock wait timed out");
                return Err(LogError::LockTimeout {
                    partition: partition.to_string(),
                    waited,
                });
            }
        }
        held.insert(partition.to_string());
        drop(held);

        Ok(PartitionLock::new(
            partition,
            MemoryGuard {
                inner: Arc::clone(&self.inner),
                partition: partition.to_string(),
            },
        ))
    }
}
