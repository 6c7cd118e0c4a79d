// hasher.rs - SHA-256 hash chain.
//
// Every entry's `hash` is the SHA-256 of a canonical JSON document built from
// its own fields: `{"data":..,"partition":..,"prev_hash":..,"seq":..,"ts":..}`
// with object keys sorted at every level and no insignificant whitespace.
// Two logically identical payloads therefore hash identically no matter how
// their maps were built.
//
// SHA-256 produces a 32-byte (256-bit) digest. We encode it as a 64-character
// lowercase hex string for readability and JSON compatibility.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::entry::format_timestamp;

/// `prev_hash` of the first entry of every partition: 32 zero bytes, hex.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Compute the chain hash of an entry from its fields.
///
/// Pure and deterministic: no I/O, no clock.
pub fn compute_hash(
    seq: u64,
    timestamp: &DateTime<Utc>,
    partition: &str,
    prev_hash: &str,
    data: &Value,
) -> String {
    hash_str(&canonical_form(seq, timestamp, partition, prev_hash, data))
}

/// The exact string that `compute_hash` digests.
pub fn canonical_form(
    seq: u64,
    timestamp: &DateTime<Utc>,
    partition: &str,
    prev_hash: &str,
    data: &Value,
) -> String {
    let mut doc = Map::new();
    doc.insert("data".to_string(), canonicalize(data));
    doc.insert("partition".to_string(), Value::from(partition));
    doc.insert("prev_hash".to_string(), Value::from(prev_hash));
    doc.insert("seq".to_string(), Value::from(seq));
    doc.insert("ts".to_string(), Value::from(format_timestamp(timestamp)));
    // `Value`'s Display is compact JSON and cannot fail.
    Value::Object(doc).to_string()
}

/// Rebuild `value` with every object's keys inserted in sorted order.
///
/// serde_json's default map is already sorted, but with the `preserve_order`
/// feature enabled anywhere in the build it keeps insertion order instead;
/// rebuilding keeps the canonical form independent of that.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
