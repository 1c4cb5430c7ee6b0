//! Push subscriptions: ordered delivery of newly stored chunks.
//!
//! Every subscription owns an iteration task with a private checkpoint. The
//! store pulses all registered wake signals after each admission to the push
//! index; a pulsed task rescans from its checkpoint and hands chunks over one
//! at a time. Stop, store close and scope cancellation all end the task the
//! same way: the stream closes and the checkpoint is discarded.

mod envelope;
/// Push subscription counters.
pub mod metrics;
/// Wake signal registry.
pub mod registry;
/// Subscription handle, controls and iteration task.
pub mod subscription;
mod tracker;

use std::sync::Arc;
use std::time::Duration;

pub use metrics::{PushMetrics, PushMetricsSnapshot};
pub use registry::{NotifyOutcome, TriggerHandle, TriggerRegistry};
pub use subscription::{PushControls, PushSubscription, SkipFn, SubscriptionId};

pub(crate) use envelope::ChunkSource;
pub(crate) use tracker::TaskTracker;

use crate::chunk::Address;
use crate::scope::{Latch, Scope};
use crate::storage::PushIndex;

/// State shared by the store and every iteration task.
pub(crate) struct PushCore {
    pub(crate) index: Arc<dyn PushIndex>,
    pub(crate) source: ChunkSource,
    pub(crate) registry: Arc<TriggerRegistry>,
    /// Process-wide close; every task selects on it.
    pub(crate) close: Latch,
    pub(crate) metrics: PushMetrics,
    pub(crate) tracker: TaskTracker,
    pub(crate) reset_backoff: Duration,
}

impl PushCore {
    pub(crate) fn new(index: Arc<dyn PushIndex>, source: ChunkSource, reset_backoff: Duration) -> Self {
        Self {
            index,
            source,
            registry: Arc::new(TriggerRegistry::new()),
            close: Latch::new(),
            metrics: PushMetrics::default(),
            tracker: TaskTracker::default(),
            reset_backoff,
        }
    }

    pub(crate) fn subscribe<F>(self: &Arc<Self>, scope: &Scope, skip: F) -> PushSubscription
    where
        F: Fn(&Address) -> bool + Send + 'static,
    {
        subscription::open(self, scope, Box::new(skip))
    }

    /// Wakes every live subscription. Never blocks.
    pub(crate) fn trigger(&self) -> NotifyOutcome {
        let outcome = self.registry.notify_all();
        self.metrics.coalesced(outcome.coalesced);
        outcome
    }
}
