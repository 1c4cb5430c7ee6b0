//! Counts running iteration tasks so `close` can wait for them.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct TrackerState {
    active: Mutex<usize>,
    idle: Condvar,
}

/// Shared counter of live iteration tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskTracker {
    state: Arc<TrackerState>,
}

/// Held by a running task; dropping it marks the task finished.
#[derive(Debug)]
pub(crate) struct TaskGuard {
    state: Arc<TrackerState>,
}

impl TaskTracker {
    /// Registers a task. Call before spawning so waiters never miss it.
    pub(crate) fn enter(&self) -> TaskGuard {
        *self.state.active.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        TaskGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn active(&self) -> usize {
        *self.state.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until no task is running or the timeout passes. Returns how many are left.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> usize {
        let active = self.state.active.lock().unwrap_or_else(PoisonError::into_inner);
        let (active, _) = self
            .state
            .idle
            .wait_timeout_while(active, timeout, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *active
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut active = self.state.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.state.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn wait_idle_returns_when_guards_drop() {
        let tracker = TaskTracker::default();
        let guard = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.active(), 2);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
            drop(second);
        });

        assert_eq!(tracker.wait_idle(Duration::from_secs(5)), 0);
        worker.join().unwrap();
    }

    #[test]
    fn wait_idle_times_out_with_remaining_count() {
        let tracker = TaskTracker::default();
        let _guard = tracker.enter();
        assert_eq!(tracker.wait_idle(Duration::from_millis(10)), 1);
    }
}
