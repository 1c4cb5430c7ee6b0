//! Local chunk store.
//!
//! `LocalStore` writes chunks into the blob store, records where they live in
//! the retrieval index, admits them to the push index, and wakes push
//! subscriptions. Admission is serialized so keys enter the push index in
//! key order: a subscription whose checkpoint has moved past key `k` must
//! never see a key below `k` appear later.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chunk::{Address, Chunk, TagId};
use crate::config::PushConfig;
use crate::error::{PushError, PushResult};
use crate::push::{ChunkSource, NotifyOutcome, PushCore, PushMetricsSnapshot, PushSubscription};
use crate::record::{DataRecord, PushItem, PushKey};
use crate::scope::Scope;
use crate::storage::{BlobStore, InMemoryStores, PushIndex, RetrievalIndex, StorageError};

/// Chunk store with ordered push subscriptions.
pub struct LocalStore {
    core: Arc<PushCore>,
    retrieval: Arc<dyn RetrievalIndex>,
    blobs: Arc<dyn BlobStore>,
    config: PushConfig,
    /// Next push key. Held across key assignment and index insertion.
    next_key: Mutex<PushKey>,
}

impl LocalStore {
    /// Opens a store over the given backends.
    ///
    /// Keys continue after the highest key already in `push_index`.
    pub fn new(
        push_index: Arc<dyn PushIndex>,
        retrieval: Arc<dyn RetrievalIndex>,
        blobs: Arc<dyn BlobStore>,
        config: PushConfig,
    ) -> PushResult<Self> {
        let config = config.validate()?;
        let next_key = push_index.last_key()?.map_or(PushKey(0), PushKey::next);
        let source = ChunkSource::new(Arc::clone(&retrieval), Arc::clone(&blobs));
        let core = Arc::new(PushCore::new(push_index, source, config.reset_backoff));

        Ok(Self {
            core,
            retrieval,
            blobs,
            config,
            next_key: Mutex::new(next_key),
        })
    }

    /// Opens a store over fresh in-memory backends.
    pub fn in_memory(config: PushConfig) -> PushResult<Self> {
        let config = config.validate()?;
        let stores = InMemoryStores::from_config(&config);
        Self::new(stores.push_index, stores.retrieval, stores.blobs, config)
    }

    /// Stores a chunk and admits it to the push index.
    ///
    /// Returns the assigned key, or `None` if the address was already stored
    /// (nothing is written and no subscription is woken).
    pub fn put(&self, chunk: &Chunk) -> PushResult<Option<PushKey>> {
        if self.is_closed() {
            return Err(PushError::Closed);
        }
        if chunk.data().len() > self.config.max_payload_size {
            return Err(StorageError::PayloadTooLarge {
                len: chunk.data().len(),
                max: self.config.max_payload_size,
            }
            .into());
        }

        let key = {
            let mut next_key = self
                .next_key
                .lock()
                .map_err(|_| PushError::internal("push key lock poisoned"))?;

            if self.retrieval.has(chunk.address())? {
                return Ok(None);
            }

            let location = self.blobs.write(chunk.data())?;
            if let Err(err) = self.retrieval.put(data_record(chunk, location.to_binary())) {
                let _ = self.blobs.release(location);
                return Err(err.into());
            }

            let key = *next_key;
            let admitted = self.core.index.insert(PushItem {
                key,
                address: *chunk.address(),
                tag: chunk.tag(),
                stored_at: Utc::now(),
            });
            if let Err(err) = admitted {
                // Undo the writes so a retried put admits the chunk again.
                let _ = self.retrieval.remove(chunk.address());
                let _ = self.blobs.release(location);
                debug!(address = %chunk.address(), error = %err, "push index admission failed");
                return Err(err.into());
            }
            *next_key = key.next();
            key
        };

        debug!(address = %chunk.address(), key = %key, "chunk admitted to push index");
        self.trigger_push_subscriptions();
        Ok(Some(key))
    }

    /// Reads a stored chunk. Push-only metadata such as the upload tag is not kept
    /// in the retrieval index, so the returned chunk is untagged.
    pub fn get(&self, scope: &Scope, address: &Address) -> PushResult<Chunk> {
        Ok(self.core.source.resolve(scope, address, TagId::NONE)?)
    }

    /// Returns true if the chunk is stored.
    pub fn has(&self, address: &Address) -> PushResult<bool> {
        Ok(self.retrieval.has(address)?)
    }

    /// Marks a chunk as pushed: it leaves the push index but stays retrievable.
    ///
    /// Returns true if the chunk was still waiting to be pushed.
    pub fn set_synced(&self, address: &Address) -> PushResult<bool> {
        let _guard = self
            .next_key
            .lock()
            .map_err(|_| PushError::internal("push key lock poisoned"))?;
        Ok(self.core.index.remove(address)?)
    }

    /// Number of chunks still waiting to be pushed.
    pub fn push_index_len(&self) -> PushResult<usize> {
        Ok(self.core.index.len()?)
    }

    /// Opens an ordered push subscription.
    ///
    /// The stream starts at the first item of the push index and follows new
    /// admissions. Addresses for which `skip` returns true are not delivered.
    /// Ending `scope` ends the subscription.
    pub fn subscribe_push<F>(&self, scope: &Scope, skip: F) -> PushSubscription
    where
        F: Fn(&Address) -> bool + Send + 'static,
    {
        let sub = self.core.subscribe(scope, skip);
        debug!(subscription = %sub.id(), "push subscription opened");
        sub
    }

    /// Wakes every push subscription to rescan the push index.
    ///
    /// `put` calls this after each admission; writers that admit items to a
    /// shared push index by other means must call it after they commit.
    pub fn trigger_push_subscriptions(&self) -> NotifyOutcome {
        self.core.trigger()
    }

    /// Number of subscriptions with a registered wake signal.
    #[must_use]
    pub fn active_push_subscriptions(&self) -> usize {
        self.core.registry.len()
    }

    /// Number of iteration tasks still running.
    #[must_use]
    pub fn running_push_tasks(&self) -> usize {
        self.core.tracker.active()
    }

    /// Point-in-time copy of the push subscription counters.
    #[must_use]
    pub fn metrics(&self) -> PushMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    /// Returns true once `close` has been called or the store was dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.close.is_fired()
    }

    /// Closes the store: ends every push subscription and waits for their
    /// tasks to exit, up to `close_timeout`.
    ///
    /// Idempotent. Subsequent `put` calls fail with `Closed`.
    pub fn close(&self) -> PushResult<()> {
        if self.core.close.fire() {
            info!(subscriptions = self.active_push_subscriptions(), "closing local store");
        }

        let remaining = self.core.tracker.wait_idle(self.config.close_timeout);
        if remaining > 0 {
            warn!(remaining, "local store closed with push subscriptions still running");
            return Err(PushError::ActiveSubscriptions { remaining });
        }
        Ok(())
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        // Do not wait here: a task may be blocked reading a payload.
        self.core.close.fire();
    }
}

fn data_record(chunk: &Chunk, location: Vec<u8>) -> DataRecord {
    let mut record = DataRecord {
        address: *chunk.address(),
        location,
        batch_id: Default::default(),
        index: [0; 8],
        timestamp: [0; 8],
        signature: Vec::new(),
    };
    if let Some(stamp) = chunk.stamp() {
        record.batch_id = stamp.batch_id;
        record.index = stamp.index;
        record.timestamp = stamp.timestamp;
        record.signature = stamp.signature.clone();
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::chunk::{BatchId, Stamp};
    use crate::storage::MemoryPushIndex;

    fn store() -> LocalStore {
        LocalStore::in_memory(PushConfig::default().with_reset_backoff(Duration::from_millis(10))).unwrap()
    }

    #[test]
    fn put_assigns_increasing_keys() {
        let store = store();
        let a = store.put(&Chunk::content_addressed(b"a".to_vec())).unwrap();
        let b = store.put(&Chunk::content_addressed(b"b".to_vec())).unwrap();
        assert_eq!(a, Some(PushKey(0)));
        assert_eq!(b, Some(PushKey(1)));
        assert_eq!(store.push_index_len().unwrap(), 2);
    }

    #[test]
    fn put_existing_address_is_a_noop() {
        let store = store();
        let chunk = Chunk::content_addressed(b"dup".to_vec());
        assert!(store.put(&chunk).unwrap().is_some());
        assert_eq!(store.put(&chunk).unwrap(), None);
        assert_eq!(store.push_index_len().unwrap(), 1);
    }

    #[test]
    fn get_returns_payload_and_stamp() {
        let store = store();
        let stamp = Stamp::new(BatchId([1; 32]), [2; 8], [3; 8], vec![4; 65]);
        let chunk = Chunk::content_addressed(b"payload".to_vec()).with_stamp(stamp.clone());
        store.put(&chunk).unwrap();

        let got = store.get(&Scope::new(), chunk.address()).unwrap();
        assert_eq!(got.data(), b"payload");
        assert_eq!(got.stamp(), Some(&stamp));
        assert!(store.has(chunk.address()).unwrap());
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = store();
        let err = store.get(&Scope::new(), &Address::of(b"nope")).unwrap_err();
        assert!(matches!(err, PushError::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn set_synced_removes_from_push_index_only() {
        let store = store();
        let chunk = Chunk::content_addressed(b"synced".to_vec());
        store.put(&chunk).unwrap();

        assert!(store.set_synced(chunk.address()).unwrap());
        assert!(!store.set_synced(chunk.address()).unwrap());
        assert_eq!(store.push_index_len().unwrap(), 0);
        assert!(store.has(chunk.address()).unwrap());
    }

    #[test]
    fn put_rejects_oversized_payload() {
        let store = store();
        let chunk = Chunk::content_addressed(vec![0; PushConfig::DEFAULT_PAYLOAD_SIZE + 1]);
        let err = store.put(&chunk).unwrap_err();
        assert!(matches!(err, PushError::Storage(StorageError::PayloadTooLarge { .. })));
    }

    #[test]
    fn put_after_close_fails() {
        let store = store();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(store.put(&Chunk::content_addressed(b"late".to_vec())).unwrap_err().is_closed());
        store.close().unwrap();
    }

    #[test]
    fn keys_continue_after_existing_index() {
        let index = Arc::new(MemoryPushIndex::default());
        index
            .insert(PushItem {
                key: PushKey(41),
                address: Address::of(b"old"),
                tag: TagId::NONE,
                stored_at: Utc::now(),
            })
            .unwrap();

        let stores = InMemoryStores::default();
        let store = LocalStore::new(index, stores.retrieval, stores.blobs, PushConfig::default()).unwrap();
        let key = store.put(&Chunk::content_addressed(b"new".to_vec())).unwrap();
        assert_eq!(key, Some(PushKey(42)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = PushConfig {
            index_page_size: 0,
            ..PushConfig::default()
        };
        assert!(matches!(LocalStore::in_memory(cfg), Err(PushError::Config(_))));
    }
}
