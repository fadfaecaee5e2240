//! Client-side call statistics
//!
//! # Memory Ordering
//!
//! Every counter uses Relaxed ordering. The counters are purely
//! observational and synchronize nothing else; approximate reads while
//! calls are in flight are acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use shardgate_core::Result;

/// Live counters shared by a router and everything it hands out
#[derive(Debug, Default)]
pub struct Stats {
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    calls_cancelled: AtomicU64,
    short_circuited: AtomicU64,
    txn_begun: AtomicU64,
    txn_committed: AtomicU64,
    txn_rolled_back: AtomicU64,
    txn_leaked: AtomicU64,
    streams_opened: AtomicU64,
    streams_released: AtomicU64,
}

impl Stats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn call_started(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a call that reached the port
    pub(crate) fn call_finished<T>(&self, outcome: &Result<T>) {
        let counter = match outcome {
            Ok(_) => &self.calls_succeeded,
            Err(e) if e.is_cancelled() => &self.calls_cancelled,
            Err(_) => &self.calls_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn short_circuit(&self) {
        self.short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn txn_begun(&self) {
        self.txn_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn txn_committed(&self) {
        self.txn_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn txn_rolled_back(&self) {
        self.txn_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn txn_leaked(&self) {
        self.txn_leaked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_released(&self) {
        self.streams_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls_started: self.calls_started.load(Ordering::Relaxed),
            calls_succeeded: self.calls_succeeded.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            calls_cancelled: self.calls_cancelled.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            txn_begun: self.txn_begun.load(Ordering::Relaxed),
            txn_committed: self.txn_committed.load(Ordering::Relaxed),
            txn_rolled_back: self.txn_rolled_back.load(Ordering::Relaxed),
            txn_leaked: self.txn_leaked.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_released: self.streams_released.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Calls submitted to the port
    pub calls_started: u64,
    /// Calls that returned a result
    pub calls_succeeded: u64,
    /// Calls that failed with a non-cancellation error
    pub calls_failed: u64,
    /// Calls abandoned by cancellation or deadline
    pub calls_cancelled: u64,
    /// Calls answered locally because the target was empty
    pub short_circuited: u64,
    /// Transactions opened
    pub txn_begun: u64,
    /// Transactions committed
    pub txn_committed: u64,
    /// Transactions rolled back, explicitly or after a failed commit
    pub txn_rolled_back: u64,
    /// Transactions dropped while still open
    pub txn_leaked: u64,
    /// Streaming cursors handed out
    pub streams_opened: u64,
    /// Streaming cursors released
    pub streams_released: u64,
}

impl StatsSnapshot {
    /// Calls that reached a final outcome
    pub fn calls_completed(&self) -> u64 {
        self.calls_succeeded + self.calls_failed + self.calls_cancelled
    }

    /// Streaming cursors still holding a stream
    pub fn streams_live(&self) -> u64 {
        self.streams_opened.saturating_sub(self.streams_released)
    }
}
