//! Push subscription handle, its controls, and the iteration task behind it.
//!
//! Each subscription runs one thread that waits for a wake pulse, scans the
//! push index strictly after its checkpoint, and hands chunks to the
//! subscriber over a rendezvous channel. The checkpoint only moves once the
//! subscriber has actually taken a chunk, so a stop, close or cancellation
//! racing a delivery never skips the item being delivered.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::chunk::{Address, Chunk};
use crate::error::{PushError, PushResult};
use crate::record::PushKey;
use crate::scope::{Latch, Scope, ScopeError};
use crate::storage::{IterateOptions, StorageError};

use super::registry::{TriggerHandle, TriggerRegistry};
use super::PushCore;

/// Unique identifier for a push subscription, used in logs and thread names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied predicate: return true to leave an address out of the stream.
pub type SkipFn = Box<dyn Fn(&Address) -> bool + Send + 'static>;

struct ControlsInner {
    id: SubscriptionId,
    handle: TriggerHandle,
    registry: Arc<TriggerRegistry>,
    stop: Arc<Latch>,
    reset_tx: Sender<()>,
    reset_backoff: Duration,
}

/// `reset` and `stop` for one push subscription.
///
/// Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct PushControls {
    inner: Arc<ControlsInner>,
}

impl PushControls {
    /// Restart delivery from the beginning of the push index.
    ///
    /// Blocks the caller for the configured backoff first. Chunks already
    /// delivered will be delivered again. No-op once the subscription ended.
    pub fn reset(&self) {
        thread::sleep(self.inner.reset_backoff);
        let _ = self.inner.reset_tx.try_send(());
    }

    /// Stop the subscription and close its stream.
    ///
    /// Idempotent and safe to race with other `stop` calls, store close, and
    /// the task ending on its own.
    pub fn stop(&self) {
        self.inner.stop.fire();
        if self.inner.registry.deregister(self.inner.handle) {
            debug!(subscription = %self.inner.id, "push subscription stopped");
        }
    }

    /// Returns true once `stop` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_fired()
    }

    /// Id of the subscription these controls belong to.
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.inner.id
    }
}

impl fmt::Debug for PushControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushControls")
            .field("id", &self.inner.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A push subscription: an ordered stream of chunks plus its controls.
///
/// The stream ends (every receive reports closure) after `stop`, store close,
/// cancellation of the opening scope, or an iteration failure. Once stopped,
/// receives through this handle report closure even if a chunk was mid-handoff.
/// Dropping the subscription stops it.
pub struct PushSubscription {
    chunks: Receiver<Chunk>,
    controls: PushControls,
}

impl PushSubscription {
    /// Subscription id, as it appears in logs.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.controls.subscription_id()
    }

    /// A clonable handle to `reset` and `stop`.
    #[must_use]
    pub fn controls(&self) -> PushControls {
        self.controls.clone()
    }

    /// See [`PushControls::reset`].
    pub fn reset(&self) {
        self.controls.reset();
    }

    /// See [`PushControls::stop`].
    pub fn stop(&self) {
        self.controls.stop();
    }

    /// Receive the next chunk, blocking. `None` means the stream has ended.
    pub fn recv(&self) -> Option<Chunk> {
        if self.controls.is_stopped() {
            return None;
        }
        let chunk = self.chunks.recv().ok()?;
        self.admit(chunk)
    }

    /// Receive the next chunk with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> PushResult<Chunk> {
        if self.controls.is_stopped() {
            return Err(PushError::StreamClosed);
        }
        let chunk = self.chunks.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => PushError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => PushError::StreamClosed,
        })?;
        self.admit(chunk).ok_or(PushError::StreamClosed)
    }

    /// Receive a chunk only if one is being offered right now.
    ///
    /// Returns `Ok(None)` when nothing is pending and `Err(StreamClosed)` once the stream ended.
    pub fn try_recv(&self) -> PushResult<Option<Chunk>> {
        if self.controls.is_stopped() {
            return Err(PushError::StreamClosed);
        }
        match self.chunks.try_recv() {
            Ok(chunk) => self.admit(chunk).map(Some).ok_or(PushError::StreamClosed),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PushError::StreamClosed),
        }
    }

    /// The underlying rendezvous receiver, for use in a caller's own `select!`.
    ///
    /// Receives through it are not filtered against a concurrent `stop`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<Chunk> {
        &self.chunks
    }

    /// Blocking iterator over the stream until it ends.
    pub fn iter(&self) -> impl Iterator<Item = Chunk> + '_ {
        std::iter::from_fn(move || self.recv())
    }

    // A chunk that raced a concurrent `stop` is dropped here.
    fn admit(&self, chunk: Chunk) -> Option<Chunk> {
        (!self.controls.is_stopped()).then_some(chunk)
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.controls.stop();
    }
}

impl fmt::Debug for PushSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSubscription")
            .field("controls", &self.controls)
            .finish_non_exhaustive()
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    /// Reached the end of the committed index; go back to waiting.
    Exhausted,
    /// Stop or store close fired.
    Shutdown,
    /// The opening scope ended.
    Cancelled(ScopeError),
    /// The subscriber dropped its receiver.
    Detached,
    /// A reset arrived while a chunk was waiting to be taken.
    Reset,
}

struct IterationTask {
    id: SubscriptionId,
    core: Arc<PushCore>,
    scope: Scope,
    deadline: Receiver<Instant>,
    skip: SkipFn,
    chunks: Sender<Chunk>,
    trigger_tx: Sender<()>,
    trigger_rx: Receiver<()>,
    reset_rx: Receiver<()>,
    stop: Arc<Latch>,
    handle: TriggerHandle,
}

/// Opens a push subscription against `core`.
pub(crate) fn open(core: &Arc<PushCore>, scope: &Scope, skip: SkipFn) -> PushSubscription {
    core.metrics.subscribed();

    let id = SubscriptionId::new();
    let (chunks_tx, chunks_rx) = bounded::<Chunk>(0);
    let (trigger_tx, trigger_rx) = bounded::<()>(1);
    let (reset_tx, reset_rx) = bounded::<()>(1);

    // Initial pulse so the first scan runs without waiting for an admission.
    let _ = trigger_tx.try_send(());
    let handle = core.registry.register(trigger_tx.clone());

    let stop = Arc::new(Latch::new());
    let task = IterationTask {
        id,
        core: Arc::clone(core),
        scope: scope.clone(),
        deadline: scope.deadline_timer(),
        skip,
        chunks: chunks_tx,
        trigger_tx,
        trigger_rx,
        reset_rx,
        stop: Arc::clone(&stop),
        handle,
    };

    let guard = core.tracker.enter();
    thread::Builder::new()
        .name(format!("chunkpush-sub-{id}"))
        .spawn(move || {
            let _guard = guard;
            task.run();
        })
        .expect("failed to spawn chunkpush subscription worker");

    PushSubscription {
        chunks: chunks_rx,
        controls: PushControls {
            inner: Arc::new(ControlsInner {
                id,
                handle,
                registry: Arc::clone(&core.registry),
                stop,
                reset_tx,
                reset_backoff: core.reset_backoff,
            }),
        },
    }
}

impl IterationTask {
    fn run(self) {
        let mut checkpoint: Option<PushKey> = None;

        loop {
            select! {
                recv(self.stop.signal()) -> _ => break,
                recv(self.core.close.signal()) -> _ => break,
                recv(self.scope.cancelled()) -> _ => {
                    debug!(subscription = %self.id, error = %ScopeError::Cancelled, "push subscription iteration");
                    break;
                }
                recv(self.deadline) -> _ => {
                    debug!(subscription = %self.id, error = %ScopeError::DeadlineExceeded, "push subscription iteration");
                    break;
                }
                recv(self.reset_rx) -> msg => {
                    // Every controls handle is gone, so the subscription was dropped.
                    if msg.is_err() {
                        break;
                    }
                    checkpoint = None;
                    let _ = self.trigger_tx.try_send(());
                }
                recv(self.trigger_rx) -> _ => match self.scan(&mut checkpoint) {
                    Ok(ScanEnd::Exhausted) => {}
                    Ok(ScanEnd::Reset) => {
                        checkpoint = None;
                        let _ = self.trigger_tx.try_send(());
                    }
                    Ok(ScanEnd::Shutdown) => break,
                    Ok(ScanEnd::Detached) => {
                        debug!(subscription = %self.id, "push subscriber went away");
                        break;
                    }
                    Ok(ScanEnd::Cancelled(reason)) => {
                        debug!(subscription = %self.id, error = %reason, "push subscription iteration");
                        break;
                    }
                    Err(StorageError::Cancelled) => {
                        let reason = self.scope.err().unwrap_or(ScopeError::Cancelled);
                        debug!(subscription = %self.id, error = %reason, "push subscription iteration");
                        break;
                    }
                    Err(err) => {
                        self.core.metrics.iteration_failed();
                        debug!(subscription = %self.id, error = %err, "push subscription iteration failed");
                        break;
                    }
                },
            }
        }

        self.core.registry.deregister(self.handle);
        self.core.metrics.task_done();
        trace!(subscription = %self.id, checkpoint = ?checkpoint, "push subscription iteration done");
    }

    fn halted(&self) -> bool {
        self.stop.is_fired() || self.core.close.is_fired()
    }

    fn scan(&self, checkpoint: &mut Option<PushKey>) -> Result<ScanEnd, StorageError> {
        let started = Instant::now();
        let mut end = ScanEnd::Exhausted;
        let mut delivered = 0u64;

        let result = self.core.index.iterate(IterateOptions::after(*checkpoint), &mut |item| {
            if self.halted() {
                end = ScanEnd::Shutdown;
                return Ok(ControlFlow::Break(()));
            }
            if let Some(reason) = self.scope.err() {
                end = ScanEnd::Cancelled(reason);
                return Ok(ControlFlow::Break(()));
            }
            if (self.skip)(&item.address) {
                return Ok(ControlFlow::Continue(()));
            }

            let chunk = self.core.source.resolve(&self.scope, &item.address, item.tag)?;

            select! {
                send(self.chunks, chunk) -> res => {
                    if res.is_err() {
                        end = ScanEnd::Detached;
                        return Ok(ControlFlow::Break(()));
                    }
                    *checkpoint = Some(item.key);
                    delivered += 1;
                    Ok(ControlFlow::Continue(()))
                }
                recv(self.stop.signal()) -> _ => {
                    end = ScanEnd::Shutdown;
                    Ok(ControlFlow::Break(()))
                }
                recv(self.core.close.signal()) -> _ => {
                    end = ScanEnd::Shutdown;
                    Ok(ControlFlow::Break(()))
                }
                recv(self.scope.cancelled()) -> _ => {
                    end = ScanEnd::Cancelled(ScopeError::Cancelled);
                    Ok(ControlFlow::Break(()))
                }
                recv(self.deadline) -> _ => {
                    end = ScanEnd::Cancelled(ScopeError::DeadlineExceeded);
                    Ok(ControlFlow::Break(()))
                }
                recv(self.reset_rx) -> msg => {
                    end = if msg.is_ok() { ScanEnd::Reset } else { ScanEnd::Shutdown };
                    Ok(ControlFlow::Break(()))
                }
            }
        });

        let elapsed = started.elapsed();
        self.core.metrics.iteration(elapsed, delivered);
        trace!(
            subscription = %self.id,
            delivered,
            checkpoint = ?checkpoint,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "push subscription iteration"
        );

        result.map(|()| end)
    }
}
