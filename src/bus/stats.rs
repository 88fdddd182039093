use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Broker counters. All updates are relaxed; values are for monitoring.
#[derive(Debug, Default)]
pub struct BrokerStats {
    /// Messages accepted into the queue.
    pub published: AtomicU64,
    /// Publishes rejected because the broker was not running.
    pub rejected_not_running: AtomicU64,
    /// Publishes rejected because the queue was full.
    pub rejected_queue_full: AtomicU64,
    /// Messages taken off the queue by the dispatcher.
    pub dispatched: AtomicU64,
    /// Listener jobs handed to the worker pool.
    pub jobs_submitted: AtomicU64,
    /// Listener jobs dropped because the worker queue was full.
    pub jobs_dropped: AtomicU64,
    pub listener_successes: AtomicU64,
    pub listener_failures: AtomicU64,
    pub listener_panics: AtomicU64,
}

/// Point-in-time copy of [`BrokerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub published: u64,
    pub rejected_not_running: u64,
    pub rejected_queue_full: u64,
    pub dispatched: u64,
    pub jobs_submitted: u64,
    pub jobs_dropped: u64,
    pub listener_successes: u64,
    pub listener_failures: u64,
    pub listener_panics: u64,
    pub queue_len: usize,
}

impl BrokerStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        queue_len: usize,
    ) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            rejected_not_running: self.rejected_not_running.load(Ordering::Relaxed),
            rejected_queue_full: self.rejected_queue_full.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            listener_successes: self.listener_successes.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            queue_len,
        }
    }
}

impl StatsSnapshot {
    /// Publishes that never entered the queue.
    pub fn rejected(&self) -> u64 {
        self.rejected_not_running + self.rejected_queue_full
    }
}
