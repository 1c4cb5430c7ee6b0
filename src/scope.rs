//! One-shot shutdown latches and caller-scoped cancellation.
//!
//! Both primitives broadcast by disconnecting a channel: a latch holds the
//! only `Sender`, and firing it drops that sender so every receiver (and every
//! `select!` arm waiting on one) observes the disconnect at once. Nothing is
//! ever sent, so a fired latch cannot be "consumed" by one waiter.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, at, bounded, never, Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;

/// Idempotent one-way broadcast signal.
///
/// Once fired it stays fired. `fire` may be called any number of times from
/// any number of threads.
pub struct Latch {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Latch {
    /// Creates an unfired latch.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Fires the latch. Returns true only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take().is_some()
    }

    /// Returns true once the latch has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Receiver that becomes ready (disconnected) when the latch fires.
    ///
    /// Intended for `select!` arms: `recv(latch.signal()) -> _ => ...`.
    #[must_use]
    pub fn signal(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Blocks until the latch fires or the timeout elapses. Returns true if fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch").field("fired", &self.is_fired()).finish()
    }
}

/// Why a scope ended.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    /// The scope was cancelled explicitly.
    #[error("scope cancelled")]
    Cancelled,
    /// The scope's deadline passed.
    #[error("scope deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct ScopeInner {
    cancel: Latch,
    deadline: Option<Instant>,
}

/// Caller-scoped cancellation handle.
///
/// Clones share the same cancellation state. A scope ends when `cancel` is
/// called on any clone or when its deadline (if any) passes.
#[derive(Debug, Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// A scope that only ends when cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A scope that ends after `timeout` or when cancelled.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    /// A scope that ends at `deadline` or when cancelled.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                cancel: Latch::new(),
                deadline,
            }),
        }
    }

    /// Cancels the scope and every clone of it.
    pub fn cancel(&self) {
        self.inner.cancel.fire();
    }

    /// The deadline, if the scope has one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns why the scope ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ScopeError> {
        if self.inner.cancel.is_fired() {
            return Some(ScopeError::Cancelled);
        }
        match self.inner.deadline {
            Some(d) if Instant::now() >= d => Some(ScopeError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true once the scope has ended.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Receiver that disconnects on explicit cancellation.
    #[must_use]
    pub fn cancelled(&self) -> &Receiver<()> {
        self.inner.cancel.signal()
    }

    /// Receiver that yields once when the deadline passes; never ready without one.
    ///
    /// Each call creates a fresh timer, so waiters should create it once and
    /// reuse it across `select!` iterations.
    #[must_use]
    pub fn deadline_timer(&self) -> Receiver<Instant> {
        match self.inner.deadline {
            Some(d) if d <= Instant::now() => after(Duration::ZERO),
            Some(d) => at(d),
            None => never(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn latch_fires_once() {
        let latch = Latch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn latch_concurrent_fire_reports_single_winner() {
        let latch = Arc::new(Latch::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.fire())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fired| *fired)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn latch_wakes_blocked_waiter() {
        let latch = Arc::new(Latch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        latch.fire();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn unfired_latch_times_out() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn scope_cancel_is_shared_by_clones() {
        let scope = Scope::new();
        let clone = scope.clone();
        assert_eq!(clone.err(), None);
        scope.cancel();
        assert_eq!(clone.err(), Some(ScopeError::Cancelled));
        assert!(matches!(clone.cancelled().try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn scope_deadline_expires() {
        let scope = Scope::with_timeout(Duration::from_millis(10));
        assert!(!scope.is_done());
        let timer = scope.deadline_timer();
        timer.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[test]
    fn scope_without_deadline_timer_never_fires() {
        let scope = Scope::new();
        assert!(scope.deadline_timer().recv_timeout(Duration::from_millis(5)).is_err());
        assert_eq!(scope.deadline(), None);
    }
}
