//! Push subscription counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counters updated by the store and its iteration tasks.
#[derive(Debug, Default)]
pub struct PushMetrics {
    subscribe_push: AtomicU64,
    iterations: AtomicU64,
    iteration_failures: AtomicU64,
    iterations_done: AtomicU64,
    chunks_delivered: AtomicU64,
    triggers_coalesced: AtomicU64,
    iteration_nanos: AtomicU64,
}

/// Point-in-time copy of [`PushMetrics`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushMetricsSnapshot {
    pub subscribe_push: u64,
    pub iterations: u64,
    pub iteration_failures: u64,
    pub iterations_done: u64,
    pub chunks_delivered: u64,
    pub triggers_coalesced: u64,
    pub total_iteration_time: Duration,
}

impl PushMetrics {
    pub(crate) fn subscribed(&self) {
        self.subscribe_push.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn iteration(&self, elapsed: Duration, delivered: u64) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.chunks_delivered.fetch_add(delivered, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.iteration_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn iteration_failed(&self) {
        self.iteration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_done(&self) {
        self.iterations_done.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn coalesced(&self, n: usize) {
        if n > 0 {
            self.triggers_coalesced.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> PushMetricsSnapshot {
        PushMetricsSnapshot {
            subscribe_push: self.subscribe_push.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            iteration_failures: self.iteration_failures.load(Ordering::Relaxed),
            iterations_done: self.iterations_done.load(Ordering::Relaxed),
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
            triggers_coalesced: self.triggers_coalesced.load(Ordering::Relaxed),
            total_iteration_time: Duration::from_nanos(self.iteration_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let m = PushMetrics::default();
        m.subscribed();
        m.iteration(Duration::from_millis(2), 3);
        m.iteration(Duration::from_millis(1), 0);
        m.iteration_failed();
        m.task_done();
        m.coalesced(0);
        m.coalesced(2);

        let s = m.snapshot();
        assert_eq!(s.subscribe_push, 1);
        assert_eq!(s.iterations, 2);
        assert_eq!(s.chunks_delivered, 3);
        assert_eq!(s.iteration_failures, 1);
        assert_eq!(s.iterations_done, 1);
        assert_eq!(s.triggers_coalesced, 2);
        assert_eq!(s.total_iteration_time, Duration::from_millis(3));
    }
}
