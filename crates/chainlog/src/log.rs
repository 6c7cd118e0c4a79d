// log.rs - ChainLog: the engine facade.
//
// ChainLog owns a PartitionStore, a LockProvider and a registry of
// per-partition state. `append` is the only mutator; everything else reads.
//
// Append path, per partition:
//   1. take the in-process partition mutex, then the provider's lock
//      (both with the configured timeout),
//   2. find the current tail: the cached (seq, hash, ts, file length) if the
//      file length still matches, otherwise a fresh backwards scan,
//   3. seal the next entry against that tail,
//   4. write it as one line with a single write call, optionally fsync,
//   5. update the cache and release both locks.
//
// The cache is only trusted while the file length matches what we last saw,
// so another process appending to the same directory forces a rescan.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::{LockKind, LogConfig};
use crate::entry::{self, Entry};
use crate::error::LogError;
use crate::hasher::GENESIS_HASH;
use crate::lock::{FileLockProvider, LockProvider, MemoryLockProvider};
use crate::reader::{CancellationToken, EntryReader, Follower};
use crate::store::{PartitionHandle, PartitionStore, Tail};
use crate::verify::{self, VerifyResult};

/// Last entry of a partition as remembered by the engine.
#[derive(Debug, Clone)]
struct CachedTail {
    seq: u64,
    hash: String,
    timestamp: DateTime<Utc>,
    /// File length right after this entry was written or observed.
    len: u64,
}

/// Per-partition in-memory state. Its mutex also serializes appenders
/// within this engine instance.
#[derive(Default)]
struct PartitionState {
    tail: Mutex<Option<CachedTail>>,
}

/// An append-only, hash-chained, partitioned event log.
pub struct ChainLog {
    config: LogConfig,
    store: PartitionStore,
    locks: Arc<dyn LockProvider>,
    registry: Mutex<HashMap<String, Arc<PartitionState>>>,
}

impl ChainLog {
    /// Open an engine with the lock provider selected by `config`.
    pub fn open(config: LogConfig) -> Result<Self, LogError> {
        let locks: Arc<dyn LockProvider> = match config.lock_provider {
            LockKind::File => Arc::new(FileLockProvider::new(&config.base_dir)),
            LockKind::Memory => Arc::new(MemoryLockProvider::new()),
        };
        Self::with_lock_provider(config, locks)
    }

    /// Open an engine with a caller-supplied lock provider.
    pub fn with_lock_provider(
        config: LogConfig,
        locks: Arc<dyn LockProvider>,
    ) -> Result<Self, LogError> {
        let store = PartitionStore::new(&config.base_dir)?;
        tracing::debug!(base_dir = %store.base_dir().display(), "opened chain log");
        Ok(Self {
            config,
            store,
            locks,
            registry: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// Append `data` to `partition` with the current time.
    ///
    /// Creates the partition on first use. Failures are never retried.
    pub fn append(&self, partition: &str, data: Value) -> Result<Entry, LogError> {
        self.append_at(partition, data, entry::now())
    }

    /// Append with a caller-supplied timestamp.
    ///
    /// A timestamp earlier than the current tail's is raised to it so that
    /// `ts` never decreases along the chain. Timestamps outside years
    /// 0000-9999 are rejected before anything is written.
    pub fn append_at(
        &self,
        partition: &str,
        data: Value,
        timestamp: DateTime<Utc>,
    ) -> Result<Entry, LogError> {
        entry::check_timestamp(&timestamp)?;
        let handle = self.store.open_or_create(partition)?;
        let state = self.state(partition);
        let timeout = self.config.lock_timeout();
        let started = Instant::now();

        let mut cached = state
            .tail
            .try_lock_for(timeout)
            .ok_or_else(|| {
                let waited = started.elapsed();
                tracing::warn!(partition, ?waited, "partition mutex wait timed out");
                LogError::LockTimeout {
                    partition: partition.to_string(),
                    waited,
                }
            })?;
        let _lock = self
            .locks
            .acquire(partition, timeout.saturating_sub(started.elapsed()))?;

        let len = handle.len()?;
        let tail = match cached.as_ref() {
            Some(tail) if tail.len == len => Some(tail.clone()),
            _ => load_tail(&handle)?,
        };

        let (seq, prev_hash, timestamp) = match &tail {
            Some(t) => (t.seq + 1, t.hash.clone(), timestamp.max(t.timestamp)),
            None => (0, GENESIS_HASH.to_string(), timestamp),
        };
        let entry = Entry::seal(seq, timestamp, partition, prev_hash, data);

        let mut line = entry::encode(&entry)?;
        line.push('\n');
        let mut file = handle.open_append()?;
        file.write_all(line.as_bytes())
            .map_err(|source| LogError::storage(handle.path(), source))?;
        if self.config.fsync {
            file.sync_data()
                .map_err(|source| LogError::storage(handle.path(), source))?;
        }

        *cached = Some(CachedTail {
            seq: entry.seq,
            hash: entry.hash.clone(),
            timestamp: entry.timestamp,
            len: len + line.len() as u64,
        });
        tracing::debug!(partition, seq = entry.seq, hash = %entry.hash, "appended entry");
        Ok(entry)
    }

    /// Entries with `seq >= start_seq`, at most `limit` of them.
    pub fn read(
        &self,
        partition: &str,
        start_seq: u64,
        limit: Option<usize>,
    ) -> Result<EntryReader, LogError> {
        let handle = self.store.open(partition)?;
        Ok(EntryReader::new(handle.cursor()?, start_seq, limit))
    }

    /// The last `n` entries of the partition, oldest first.
    pub fn read_last(&self, partition: &str, n: usize) -> Result<Vec<Entry>, LogError> {
        if n == 0 {
            self.store.open(partition)?;
            return Ok(Vec::new());
        }
        let mut window = VecDeque::with_capacity(n.min(1024));
        for entry in self.read(partition, 0, None)? {
            if window.len() == n {
                window.pop_front();
            }
            window.push_back(entry?);
        }
        Ok(window.into())
    }

    /// The last complete entry, or `None` for an empty partition.
    pub fn last_entry(&self, partition: &str) -> Result<Option<Entry>, LogError> {
        let handle = self.store.open(partition)?;
        let tail = match handle.tail()? {
            Tail::Torn { offset } => handle.tail_before(offset)?,
            tail => tail,
        };
        match tail {
            Tail::Line { line, .. } => Ok(Some(decode_last(&handle, &line)?)),
            Tail::Empty | Tail::Torn { .. } => Ok(None),
        }
    }

    /// Follow the partition from `start_seq`, waiting for new entries.
    pub fn follow(
        &self,
        partition: &str,
        start_seq: u64,
        token: CancellationToken,
    ) -> Result<Follower, LogError> {
        let handle = self.store.open(partition)?;
        Ok(Follower::new(
            handle.cursor()?,
            partition,
            start_seq,
            self.config.poll_interval(),
            token,
        ))
    }

    /// Check the partition's hash chain from genesis.
    pub fn verify(&self, partition: &str) -> Result<VerifyResult, LogError> {
        let handle = self.store.open(partition)?;
        verify::verify_partition(&handle)
    }

    pub fn list_partitions(&self) -> Result<BTreeSet<String>, LogError> {
        self.store.list()
    }

    pub fn exists(&self, partition: &str) -> bool {
        self.store.exists(partition)
    }

    pub fn open_or_create(&self, partition: &str) -> Result<PartitionHandle, LogError> {
        self.store.open_or_create(partition)
    }

    /// Registry entry for `partition`, created on first use.
    fn state(&self, partition: &str) -> Arc<PartitionState> {
        let mut registry = self.registry.lock();
        Arc::clone(registry.entry(partition.to_string()).or_default())
    }
}

/// Read the partition's last entry from disk.
fn load_tail(handle: &PartitionHandle) -> Result<Option<CachedTail>, LogError> {
    match handle.tail()? {
        Tail::Empty => Ok(None),
        Tail::Torn { offset } => Err(LogError::TornTail {
            partition: handle.name().to_string(),
            offset,
        }),
        Tail::Line { line, len } => {
            let last = decode_last(handle, &line)?;
            tracing::debug!(partition = handle.name(), seq = last.seq, "loaded tail from disk");
            Ok(Some(CachedTail {
                seq: last.seq,
                hash: last.hash,
                timestamp: last.timestamp,
                len,
            }))
        }
    }
}

fn decode_last(handle: &PartitionHandle, line: &[u8]) -> Result<Entry, LogError> {
    entry::parse(line).map_err(|source| LogError::DecodeLast {
        partition: handle.name().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::ViolationKind;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn memory_log(dir: &std::path::Path) -> ChainLog {
        let config = LogConfig {
            lock_provider: LockKind::Memory,
            fsync: false,
            ..LogConfig::for_dir(dir)
        };
        ChainLog::open(config).unwrap()
    }

    #[test]
    fn first_two_appends_form_a_chain() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());

        let e0 = log.append("users", json!({"user": "alice"})).unwrap();
        assert_eq!(e0.seq, 0);
        assert_eq!(e0.prev_hash, GENESIS_HASH);
        assert_eq!(e0.partition, "users");
        assert_eq!(e0.data, json!({"user": "alice"}));
        assert!(e0.is_intact());

        let e1 = log.append("users", json!({"user": "bob"})).unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e1.prev_hash, e0.hash);

        let result = log.verify("users").unwrap();
        assert!(result.valid);
        assert_eq!(result.count, 2);
        assert_eq!(result.final_hash, e1.hash);
    }

    #[test]
    fn partitions_are_independent() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        log.append("a", json!(1)).unwrap();
        log.append("a", json!(2)).unwrap();
        let b0 = log.append("b", json!(3)).unwrap();
        assert_eq!(b0.seq, 0);
        assert_eq!(b0.prev_hash, GENESIS_HASH);

        let names: Vec<_> = log.list_partitions().unwrap().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn reopened_engine_continues_chain() {
        let dir = tempdir().unwrap();
        let last = {
            let log = memory_log(dir.path());
            log.append("p", json!("one")).unwrap();
            log.append("p", json!("two")).unwrap()
        };
        let log = memory_log(dir.path());
        let next = log.append("p", json!("three")).unwrap();
        assert_eq!(next.seq, 2);
        assert_eq!(next.prev_hash, last.hash);
        assert!(log.verify("p").unwrap().valid);
    }

    #[test]
    fn cache_is_revalidated_when_another_writer_appends() {
        let dir = tempdir().unwrap();
        let first = memory_log(dir.path());
        let second = memory_log(dir.path());

        first.append("p", json!(0)).unwrap();
        second.append("p", json!(1)).unwrap();
        // `first` has a cached tail at seq 0, but the file has grown.
        let e2 = first.append("p", json!(2)).unwrap();
        assert_eq!(e2.seq, 2);
        assert!(first.verify("p").unwrap().valid);
    }

    #[test]
    fn earlier_timestamp_is_clamped_to_tail() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let e0 = log.append_at("p", json!(null), t0).unwrap();
        let e1 = log.append_at("p", json!(null), t0 - Duration::hours(1)).unwrap();
        assert_eq!(e1.timestamp, e0.timestamp);
        let e2 = log.append_at("p", json!(null), t0 + Duration::hours(1)).unwrap();
        assert_eq!(e2.timestamp, t0 + Duration::hours(1));
        assert!(log.verify("p").unwrap().valid);
    }

    #[test]
    fn torn_tail_blocks_append() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        let e0 = log.append("p", json!(0)).unwrap();

        let path = log.store().path_for("p").unwrap();
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"seq\":1,\"ts\"").unwrap();

        let err = log.append("p", json!(1)).unwrap_err();
        assert!(matches!(err, LogError::TornTail { .. }));
        assert!(err.is_storage());

        // Readers do not see the fragment.
        assert_eq!(log.last_entry("p").unwrap(), Some(e0));
        let result = log.verify("p").unwrap();
        assert!(result.valid);
        assert_eq!(result.count, 1);
    }

    #[test]
    fn read_honours_start_and_limit() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        for i in 0..10 {
            log.append("p", json!({"i": i})).unwrap();
        }

        let seqs: Vec<u64> = log
            .read("p", 3, Some(4))
            .unwrap()
            .map(|e| e.unwrap().seq)
            .collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);

        // Resume from last consumed seq + 1.
        let rest: Vec<u64> = log
            .read("p", 7, None)
            .unwrap()
            .map(|e| e.unwrap().seq)
            .collect();
        assert_eq!(rest, vec![7, 8, 9]);

        assert_eq!(log.read("p", 10, None).unwrap().count(), 0);
        assert_eq!(log.read("p", 0, Some(0)).unwrap().count(), 0);
    }

    #[test]
    fn read_last_and_last_entry() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        log.open_or_create("p").unwrap();
        assert_eq!(log.last_entry("p").unwrap(), None);
        assert!(log.read_last("p", 3).unwrap().is_empty());

        for i in 0..5 {
            log.append("p", json!(i)).unwrap();
        }
        let last: Vec<u64> = log.read_last("p", 2).unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(last, vec![3, 4]);
        assert_eq!(log.read_last("p", 50).unwrap().len(), 5);
        assert_eq!(log.last_entry("p").unwrap().unwrap().seq, 4);
    }

    #[test]
    fn missing_partition_is_not_found_for_readers() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        assert!(matches!(log.read("nope", 0, None), Err(LogError::NotFound(_))));
        assert!(matches!(log.verify("nope"), Err(LogError::NotFound(_))));
        assert!(matches!(
            log.follow("nope", 0, CancellationToken::new()),
            Err(LogError::NotFound(_))
        ));
        assert!(matches!(log.last_entry("nope"), Err(LogError::NotFound(_))));
        assert!(matches!(log.read_last("nope", 0), Err(LogError::NotFound(_))));
        assert!(!log.exists("nope"));
        assert!(log.list_partitions().unwrap().is_empty());
    }

    #[test]
    fn invalid_partition_name_is_rejected_on_append() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        let err = log.append("../../etc/passwd", json!({})).unwrap_err();
        assert!(matches!(err, LogError::InvalidPartitionName { .. }));
    }

    #[test]
    fn held_lock_surfaces_lock_timeout() {
        let dir = tempdir().unwrap();
        let locks = MemoryLockProvider::new();
        let config = LogConfig {
            lock_timeout_ms: 30,
            fsync: false,
            ..LogConfig::for_dir(dir.path())
        };
        let log = ChainLog::with_lock_provider(config, Arc::new(locks.clone())).unwrap();

        let _held = locks.acquire("p", std::time::Duration::from_millis(10)).unwrap();
        let err = log.append("p", json!(1)).unwrap_err();
        assert!(matches!(err, LogError::LockTimeout { .. }));
        // Nothing was written.
        assert!(log.store().open("p").unwrap().is_empty().unwrap());
    }

    #[test]
    fn tampering_is_detected_at_the_edited_line() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        for i in 0..5 {
            log.append("p", json!({"amount": i})).unwrap();
        }
        let path = log.store().path_for("p").unwrap();
        let body = fs::read_to_string(&path).unwrap();
        let edited = body.replacen("{\"amount\":2}", "{\"amount\":7}", 1);
        assert_ne!(body, edited);
        fs::write(&path, edited).unwrap();

        let result = log.verify("p").unwrap();
        assert!(!result.valid);
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, ViolationKind::HashMismatch);
        assert_eq!(failure.line, 3);
    }

    #[test]
    fn file_lock_provider_appends() {
        let dir = tempdir().unwrap();
        let log = ChainLog::open(LogConfig::for_dir(dir.path())).unwrap();
        log.append("p", json!("x")).unwrap();
        log.append("p", json!("y")).unwrap();
        assert!(dir.path().join("p.lock").exists());
        assert_eq!(log.verify("p").unwrap().count, 2);
        let names: Vec<_> = log.list_partitions().unwrap().into_iter().collect();
        assert_eq!(names, vec!["p"]);
    }
    #[test]
    fn float_payloads_verify_after_reopen() {
        let dir = tempdir().unwrap();
        let prices = [1.0715660391465826e-75, 0.1 + 0.2, 6.02214076e23, -3.4028234663852886e38];
        let written: Vec<Entry> = {
            let log = memory_log(dir.path());
            prices
                .iter()
                .map(|p| log.append("prices", json!({"price": p, "nested": [p]})).unwrap())
                .collect()
        };

        let log = memory_log(dir.path());
        let read: Vec<Entry> = log.read("prices", 0, None).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(read, written);
        let result = log.verify("prices").unwrap();
        assert!(result.valid, "{:?}", result.failure);
        assert_eq!(result.final_hash, written[3].hash);
        assert_eq!(log.append("prices", json!(0)).unwrap().prev_hash, written[3].hash);
    }

    #[test]
    fn out_of_range_timestamp_is_rejected_before_writing() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let err = log.append_at("p", json!(1), far).unwrap_err();
        assert!(matches!(err, LogError::TimestampOutOfRange { .. }));
        assert!(!err.is_storage());
        assert!(!log.exists("p"));

        let e0 = log.append("p", json!(1)).unwrap();
        let before_zero = Utc.with_ymd_and_hms(-1, 6, 1, 0, 0, 0).unwrap();
        assert!(log.append_at("p", json!(2), before_zero).is_err());
        assert_eq!(log.last_entry("p").unwrap(), Some(e0));
        assert!(log.verify("p").unwrap().valid);
    }

    #[test]
    fn held_partition_mutex_surfaces_lock_timeout() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            lock_provider: LockKind::Memory,
            lock_timeout_ms: 30,
            fsync: false,
            ..LogConfig::for_dir(dir.path())
        };
        let log = ChainLog::open(config).unwrap();
        log.append("p", json!(0)).unwrap();

        let state = log.state("p");
        let held = state.tail.lock();
        let err = log.append("p", json!(1)).unwrap_err();
        assert!(matches!(err, LogError::LockTimeout { ref partition, .. } if partition == "p"));
        drop(held);

        assert_eq!(log.append("p", json!(1)).unwrap().seq, 1);
    }

    #[test]
    fn invalid_utf8_line_is_a_decode_error_for_readers() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        log.append("p", json!({"user": "alice"})).unwrap();
        log.append("p", json!({"user": "bob"})).unwrap();

        let path = log.store().path_for("p").unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let at = bytes.windows(3).position(|w| w == b"bob").unwrap();
        bytes[at + 1] = 0xff;
        fs::write(&path, bytes).unwrap();

        let mut reader = log.read("p", 0, None).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().seq, 0);
        assert!(matches!(reader.next(), Some(Err(LogError::Decode { line: 2, .. }))));
        assert!(reader.next().is_none());

        let failure = log.verify("p").unwrap().failure.unwrap();
        assert_eq!(failure.kind, ViolationKind::HashMismatch);
        assert_eq!(failure.line, 2);
        assert!(matches!(log.last_entry("p"), Err(LogError::DecodeLast { .. })));
    }

    #[test]
    fn malformed_last_line_names_the_partition() {
        let dir = tempdir().unwrap();
        let log = memory_log(dir.path());
        log.append("orders", json!(1)).unwrap();
        let path = log.store().path_for("orders").unwrap();
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"seq\":1}\n").unwrap();

        let err = log.last_entry("orders").unwrap_err();
        assert!(matches!(err, LogError::DecodeLast { ref partition, .. } if partition == "orders"));
        assert!(err.to_string().starts_with("malformed last entry in partition 'orders'"));

        // A fresh engine has to load the tail from disk and hits the same line.
        let fresh = memory_log(dir.path());
        let err = fresh.append("orders", json!(2)).unwrap_err();
        assert!(matches!(err, LogError::DecodeLast { .. }));
        assert!(!err.to_string().contains("line 0"));
    }
}
