// entry.rs - Entry data model and line codec.
//
// An entry is one line of a partition file: a compact JSON object with keys
// `seq`, `ts`, `partition`, `prev_hash`, `data`, `hash`. JSON escapes control
// characters inside strings, so an encoded entry never contains a raw newline.

use chrono::{DateTime, Datelike, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LogError;
use crate::hasher;

/// Timestamp layout used both on disk and inside the hash input.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Years `TS_FORMAT` renders as four digits. Outside them chrono adds a sign,
/// which the RFC 3339 parser rejects.
const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// One immutable, hash-chained record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Position in the partition, starting at 0.
    pub seq: u64,

    /// Creation time (UTC, microsecond precision).
    #[serde(rename = "ts", with = "ts_format")]
    pub timestamp: DateTime<Utc>,

    /// The partition this entry belongs to.
    pub partition: String,

    /// `hash` of the entry at `seq - 1`, or [`hasher::GENESIS_HASH`] at seq 0.
    pub prev_hash: String,

    /// Caller payload, opaque to the engine.
    pub data: Value,

    /// SHA-256 over the canonical form of the fields above.
    pub hash: String,
}

impl Entry {
    /// Build an entry and compute its hash.
    ///
    /// The timestamp is truncated to microseconds so that the stored form
    /// round-trips to the exact value that was hashed.
    pub fn seal(
        seq: u64,
        timestamp: DateTime<Utc>,
        partition: impl Into<String>,
        prev_hash: impl Into<String>,
        data: Value,
    ) -> Self {
        let timestamp = timestamp.trunc_subsecs(6);
        let partition = partition.into();
        let prev_hash = prev_hash.into();
        let hash = hasher::compute_hash(seq, &timestamp, &partition, &prev_hash, &data);
        Self {
            seq,
            timestamp,
            partition,
            prev_hash,
            data,
            hash,
        }
    }

    /// Recompute the hash from this entry's own fields.
    pub fn compute_hash(&self) -> String {
        hasher::compute_hash(
            self.seq,
            &self.timestamp,
            &self.partition,
            &self.prev_hash,
            &self.data,
        )
    }

    /// True if the stored `hash` matches the recomputed one.
    pub fn is_intact(&self) -> bool {
        self.compute_hash() == self.hash
    }
}

/// Encode an entry as one line of text, without the trailing newline.
pub fn encode(entry: &Entry) -> Result<String, LogError> {
    Ok(serde_json::to_string(entry)?)
}

/// Decode one stored line. `line_no` (1-based) is carried into the error.
///
/// Works on raw bytes: a line that is not valid UTF-8 is a decode error,
/// never a silently repaired payload.
pub fn decode(line: impl AsRef<[u8]>, line_no: usize) -> Result<Entry, LogError> {
    parse(line.as_ref()).map_err(|source| LogError::Decode {
        line: line_no,
        source,
    })
}

pub(crate) fn parse(line: &[u8]) -> Result<Entry, serde_json::Error> {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    serde_json::from_slice(&line[..end])
}

/// Reject timestamps the stored layout cannot represent.
pub fn check_timestamp(ts: &DateTime<Utc>) -> Result<(), LogError> {
    if STORABLE_YEARS.contains(&ts.year()) {
        Ok(())
    } else {
        Err(LogError::TimestampOutOfRange { timestamp: *ts })
    }
}

/// Render a timestamp in the on-disk layout.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Current time at the precision entries store.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

mod ts_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
