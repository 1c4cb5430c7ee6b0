//! Process-wide registry of push subscription wake signals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crossbeam_channel::{Sender, TrySendError};

/// Stable identity of a registered wake signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriggerHandle(u64);

/// What a `notify_all` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Wake signals that received a fresh pulse.
    pub pulsed: usize,
    /// Wake signals that already had a pulse pending.
    pub coalesced: usize,
}

/// Set of live wake signals, one per open push subscription.
///
/// Each wake signal is a `bounded(1)` sender. Pulses never block: when the slot
/// is already full the pending pulse already guarantees a rescan, so the new
/// one is dropped. Lock poisoning is recovered rather than reported because no
/// operation here leaves the map half-updated.
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    triggers: RwLock<BTreeMap<TriggerHandle, Sender<()>>>,
    next_handle: AtomicU64,
}

impl TriggerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a wake signal and returns the handle used to remove it.
    pub fn register(&self, wake: Sender<()>) -> TriggerHandle {
        let handle = TriggerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.triggers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, wake);
        handle
    }

    /// Removes a wake signal. Returns true only for the call that removed it.
    pub fn deregister(&self, handle: TriggerHandle) -> bool {
        self.triggers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some()
    }

    /// Pulses every registered wake signal without blocking.
    pub fn notify_all(&self) -> NotifyOutcome {
        let triggers = self.triggers.read().unwrap_or_else(PoisonError::into_inner);
        let mut outcome = NotifyOutcome::default();
        for wake in triggers.values() {
            match wake.try_send(()) {
                Ok(()) => outcome.pulsed += 1,
                Err(TrySendError::Full(())) => outcome.coalesced += 1,
                // Task already exited and will deregister itself.
                Err(TrySendError::Disconnected(())) => {}
            }
        }
        outcome
    }

    /// Number of registered wake signals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no wake signal is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
