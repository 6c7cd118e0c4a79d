// verify.rs - Chain-integrity scan.
//
// Walks a partition from the first line, checking for every entry:
//   1. it decodes,
//   2. its stored hash equals the hash recomputed from its own fields,
//   3. its seq is the next expected one,
//   4. its prev_hash equals the previous entry's hash (genesis at seq 0).
// The scan stops at the first violation. A line that does not decode is
// reported as a hash mismatch: from the caller's side a corrupted line and a
// tampered one are the same thing.
//
// Verification never writes and takes no lock. Entries are immutable once
// their line is complete, so a concurrent append can only make the result
// slightly stale, never inconsistent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry;
use crate::error::LogError;
use crate::hasher::GENESIS_HASH;
use crate::store::PartitionHandle;

/// What kind of chain break was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// `seq` is not the expected next number.
    SequenceGap,
    /// Stored hash differs from the recomputed one, or the line is unreadable.
    HashMismatch,
    /// `prev_hash` does not match the preceding entry's hash.
    LinkMismatch,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::SequenceGap => "sequence gap",
            ViolationKind::HashMismatch => "hash mismatch",
            ViolationKind::LinkMismatch => "chain link mismatch",
        };
        f.write_str(s)
    }
}

/// The first break found in a partition's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainViolation {
    pub kind: ViolationKind,

    /// Physical line number in the partition file (1-based).
    pub line: usize,

    /// The seq the scan expected at this line.
    pub expected_seq: u64,

    /// Expected value: a hash, or a seq number for `SequenceGap`.
    /// `None` when the line could not be decoded.
    pub expected: Option<String>,

    /// Value found on the line. Empty if it could not be extracted.
    pub actual: String,
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expected {
            Some(expected) => write!(
                f,
                "{} at line {}: expected {}, got {}",
                self.kind, self.line, expected, self.actual
            ),
            None => write!(f, "{} at line {}: unreadable entry", self.kind, self.line),
        }
    }
}

/// Outcome of verifying one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,

    /// Entries verified before the scan ended (all of them when valid).
    pub count: u64,

    /// Hash of the last verified entry; genesis for an empty partition.
    /// On success this is the partition's integrity fingerprint.
    pub final_hash: String,

    pub failure: Option<ChainViolation>,
}

/// Scan `handle` from genesis and report the first violation, if any.
pub fn verify_partition(handle: &PartitionHandle) -> Result<VerifyResult, LogError> {
    let mut cursor = handle.cursor()?;
    let mut expected_seq: u64 = 0;
    let mut prev_hash = GENESIS_HASH.to_string();

    while let Some((line_no, line)) = cursor.next_line()? {
        let violation = match entry::decode(&line, line_no) {
            Err(_) => Some(ChainViolation {
                kind: ViolationKind::HashMismatch,
                line: line_no,
                expected_seq,
                expected: None,
                actual: stored_hash(&line).unwrap_or_default(),
            }),
            Ok(e) => {
                let recomputed = e.compute_hash();
                if recomputed != e.hash {
                    Some(ChainViolation {
                        kind: ViolationKind::HashMismatch,
                        line: line_no,
                        expected_seq,
                        expected: Some(recomputed),
                        actual: e.hash,
                    })
                } else if e.seq != expected_seq {
                    Some(ChainViolation {
                        kind: ViolationKind::SequenceGap,
                        line: line_no,
                        expected_seq,
                        expected: Some(expected_seq.to_string()),
                        actual: e.seq.to_string(),
                    })
                } else if e.prev_hash != prev_hash {
                    Some(ChainViolation {
                        kind: ViolationKind::LinkMismatch,
                        line: line_no,
                        expected_seq,
                        expected: Some(prev_hash.clone()),
                        actual: e.prev_hash,
                    })
                } else {
                    prev_hash = e.hash;
                    None
                }
            }
        };

        if let Some(violation) = violation {
            tracing::warn!(partition = handle.name(), %violation, "chain verification failed");
            return Ok(VerifyResult {
                valid: false,
                count: expected_seq,
                final_hash: prev_hash,
                failure: Some(violation),
            });
        }
        expected_seq += 1;
    }

    tracing::info!(
        partition = handle.name(),
        count = expected_seq,
        final_hash = %prev_hash,
        "chain verified"
    );
    Ok(VerifyResult {
        valid: true,
        count: expected_seq,
        final_hash: prev_hash,
        failure: None,
    })
}

/// Best-effort extraction of the `hash` field from an undecodable line.
fn stored_hash(line: &[u8]) -> Option<String> {
    let raw: serde_json::Value = serde_json::from_slice(line).ok()?;
    raw.get("hash")?.as_str().map(str::to_string)
}
