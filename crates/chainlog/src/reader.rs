// reader.rs - Sequential and follow-mode reads.
//
// EntryReader is a finite iterator over the entries currently in a partition,
// starting at a given seq. Follower keeps going after the end: when no
// complete line is available it sleeps for the poll interval and looks again,
// until its CancellationToken is cancelled.
//
// Both are plain iterators driven by the caller. There is no background
// thread, so the caller controls pacing and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::entry::{self, Entry};
use crate::error::LogError;
use crate::store::LineCursor;

/// Cooperative cancellation flag shared between a follower and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Followers stop within one poll interval.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Entries with `seq >= start_seq`, up to an optional limit.
///
/// Yields `Err` once on a storage or decode failure and then ends. To resume
/// later, start a new reader at the last consumed `seq + 1`.
pub struct EntryReader {
    cursor: LineCursor,
    start_seq: u64,
    remaining: Option<usize>,
    done: bool,
}

impl EntryReader {
    pub(crate) fn new(cursor: LineCursor, start_seq: u64, limit: Option<usize>) -> Self {
        Self {
            cursor,
            start_seq,
            remaining: limit,
            done: false,
        }
    }
}

impl Iterator for EntryReader {
    type Item = Result<Entry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        loop {
            let (line_no, line) = match self.cursor.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let entry = match entry::decode(&line, line_no) {
                Ok(entry) => entry,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if entry.seq < self.start_seq {
                continue;
            }
            if let Some(n) = self.remaining.as_mut() {
                *n -= 1;
            }
            return Some(Ok(entry));
        }
    }
}

/// Unbounded stream of entries with `seq >= start_seq`, in append order.
///
/// `next()` blocks until an entry is available or the token is cancelled
/// (then it returns `None`). A storage or decode failure is yielded once as
/// `Err` and ends the stream.
pub struct Follower {
    cursor: LineCursor,
    partition: String,
    /// Lowest seq still to be yielded.
    next_seq: u64,
    poll_interval: Duration,
    token: CancellationToken,
    done: bool,
}

impl Follower {
    pub(crate) fn new(
        cursor: LineCursor,
        partition: impl Into<String>,
        start_seq: u64,
        poll_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            cursor,
            partition: partition.into(),
            next_seq: start_seq,
            poll_interval,
            token,
            done: false,
        }
    }

    /// Token that cancels this follower.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Seq of the next entry this follower will yield.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Non-blocking step: the next entry if one is complete on disk now.
    pub fn poll(&mut self) -> Result<Option<Entry>, LogError> {
        while let Some((line_no, line)) = self.cursor.next_line()? {
            let entry = entry::decode(&line, line_no)?;
            // Anything below next_seq was already yielded or is before the start.
            if entry.seq < self.next_seq {
                continue;
            }
            self.next_seq = entry.seq + 1;
            return Ok(Some(entry));
        }
        Ok(None)
    }
}

impl Iterator for Follower {
    type Item = Result<Entry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.token.is_cancelled() {
                tracing::debug!(partition = %self.partition, "follow cancelled");
                self.done = true;
                return None;
            }
            match self.poll() {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    tracing::warn!(partition = %self.partition, error = %e, "follow stopped");
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
