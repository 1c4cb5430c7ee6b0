//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::chunk::Address;
use crate::config::PushConfig;
use crate::record::{DataRecord, PushItem, PushKey};
use crate::scope::Scope;

use super::location::Location;
use super::traits::{BlobStore, ItemVisitor, IterateOptions, PushIndex, RetrievalIndex, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct PushIndexState {
    by_key: BTreeMap<PushKey, PushItem>,
    by_address: HashMap<Address, PushKey>,
}

/// In-memory push index.
///
/// Iteration reads one page of items under the read lock, releases it, and
/// only then runs the visitor, so writers never wait on a slow subscriber.
#[derive(Debug)]
pub struct MemoryPushIndex {
    state: RwLock<PushIndexState>,
    page_size: usize,
}

impl MemoryPushIndex {
    /// Creates an empty index that reads `page_size` items per lock acquisition.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            state: RwLock::new(PushIndexState::default()),
            page_size: page_size.max(1),
        }
    }

    fn page(&self, lower: Bound<PushKey>) -> Result<Vec<PushItem>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("push_index.read"))?;
        Ok(state
            .by_key
            .range((lower, Bound::Unbounded))
            .take(self.page_size)
            .map(|(_, item)| item.clone())
            .collect())
    }
}

impl Default for MemoryPushIndex {
    fn default() -> Self {
        Self::new(PushConfig::default().index_page_size)
    }
}

impl PushIndex for MemoryPushIndex {
    fn insert(&self, item: PushItem) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("push_index.write"))?;
        if state.by_address.contains_key(&item.address) {
            return Err(StorageError::Duplicate(item.address));
        }
        state.by_address.insert(item.address, item.key);
        state.by_key.insert(item.key, item);
        Ok(())
    }

    fn remove(&self, address: &Address) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("push_index.write"))?;
        let Some(key) = state.by_address.remove(address) else {
            return Ok(false);
        };
        state.by_key.remove(&key);
        Ok(true)
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("push_index.read"))?;
        Ok(state.by_key.len())
    }

    fn last_key(&self) -> Result<Option<PushKey>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("push_index.read"))?;
        Ok(state.by_key.keys().next_back().copied())
    }

    fn iterate(&self, opts: IterateOptions, visit: &mut ItemVisitor<'_>) -> Result<(), StorageError> {
        let mut lower = match opts.start_from {
            Some(key) if opts.skip_start_from => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
            None => Bound::Unbounded,
        };

        loop {
            let page = self.page(lower)?;
            let Some(last) = page.last().map(|item| item.key) else {
                return Ok(());
            };

            for item in &page {
                if visit(item)?.is_break() {
                    return Ok(());
                }
            }

            lower = Bound::Excluded(last);
        }
    }
}

/// In-memory retrieval index.
#[derive(Debug, Default)]
pub struct MemoryRetrievalIndex {
    records: RwLock<HashMap<Address, DataRecord>>,
}

impl RetrievalIndex for MemoryRetrievalIndex {
    fn put(&self, record: DataRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("retrieval.write"))?;
        records.insert(record.address, record);
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<DataRecord, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("retrieval.read"))?;
        records
            .get(address)
            .cloned()
            .ok_or(StorageError::NotFound(*address))
    }

    fn has(&self, address: &Address) -> Result<bool, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("retrieval.read"))?;
        Ok(records.contains_key(address))
    }

    fn remove(&self, address: &Address) -> Result<bool, StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("retrieval.write"))?;
        Ok(records.remove(address).is_some())
    }
}

#[derive(Debug, Default)]
struct Shard {
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<u32>,
}

/// In-memory sharded blob store.
///
/// Writes rotate across shards; released slots are reused before new ones
/// are allocated.
#[derive(Debug)]
pub struct MemoryBlobStore {
    shards: Vec<RwLock<Shard>>,
    next_shard: AtomicUsize,
}

impl MemoryBlobStore {
    /// Creates a store with `shards` shards (at least one).
    #[must_use]
    pub fn new(shards: u8) -> Self {
        let count = usize::from(shards.max(1));
        Self {
            shards: (0..count).map(|_| RwLock::new(Shard::default())).collect(),
            next_shard: AtomicUsize::new(0),
        }
    }

    fn shard(&self, index: u8) -> Option<&RwLock<Shard>> {
        self.shards.get(usize::from(index))
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(PushConfig::default().blob_shards)
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, data: &[u8]) -> Result<Location, StorageError> {
        let length = u16::try_from(data.len()).map_err(|_| StorageError::PayloadTooLarge {
            len: data.len(),
            max: usize::from(u16::MAX),
        })?;

        let index = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        let shard_id = u8::try_from(index).map_err(|_| StorageError::Backend(format!("shard index {index} out of range")))?;
        let mut shard = self.shards[index].write().map_err(|_| lock_err("blob.write"))?;

        let slot = if let Some(slot) = shard.free.pop() {
            shard.slots[slot as usize] = Some(data.to_vec());
            slot
        } else {
            let slot = u32::try_from(shard.slots.len())
                .map_err(|_| StorageError::Backend(format!("shard {shard_id} is full")))?;
            shard.slots.push(Some(data.to_vec()));
            slot
        };

        Ok(Location {
            shard: shard_id,
            slot,
            length,
        })
    }

    fn read(&self, scope: &Scope, location: Location, buf: &mut [u8]) -> Result<(), StorageError> {
        if scope.is_done() {
            return Err(StorageError::Cancelled);
        }

        let need = usize::from(location.length);
        if buf.len() < need {
            return Err(StorageError::ShortBuffer { need, have: buf.len() });
        }

        let shard = self
            .shard(location.shard)
            .ok_or(StorageError::OutOfBounds(location))?
            .read()
            .map_err(|_| lock_err("blob.read"))?;

        let data = shard
            .slots
            .get(location.slot as usize)
            .and_then(Option::as_ref)
            .filter(|data| data.len() >= need)
            .ok_or(StorageError::OutOfBounds(location))?;

        buf[..need].copy_from_slice(&data[..need]);
        Ok(())
    }

    fn release(&self, location: Location) -> Result<(), StorageError> {
        let mut shard = self
            .shard(location.shard)
            .ok_or(StorageError::OutOfBounds(location))?
            .write()
            .map_err(|_| lock_err("blob.write"))?;

        let slot = shard
            .slots
            .get_mut(location.slot as usize)
            .filter(|slot| slot.is_some())
            .ok_or(StorageError::OutOfBounds(location))?;
        *slot = None;
        shard.free.push(location.slot);
        Ok(())
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Clone)]
pub struct InMemoryStores {
    /// Chunks awaiting push, in admission order.
    pub push_index: Arc<dyn PushIndex>,
    /// Address to record lookup.
    pub retrieval: Arc<dyn RetrievalIndex>,
    /// Payload bytes.
    pub blobs: Arc<dyn BlobStore>,
}

impl InMemoryStores {
    /// Builds stores sized from the config.
    #[must_use]
    pub fn from_config(config: &PushConfig) -> Self {
        Self {
            push_index: Arc::new(MemoryPushIndex::new(config.index_page_size)),
            retrieval: Arc::new(MemoryRetrievalIndex::default()),
            blobs: Arc::new(MemoryBlobStore::new(config.blob_shards)),
        }
    }
}

impl Default for InMemoryStores {
    fn default() -> Self {
        Self::from_config(&PushConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::ops::ControlFlow;

    use chrono::Utc;

    use crate::chunk::{BatchId, TagId};

    fn item(seq: u64, name: &str) -> PushItem {
        PushItem {
            key: PushKey(seq),
            address: Address::of(name.as_bytes()),
            tag: TagId::NONE,
            stored_at: Utc::now(),
        }
    }

    fn collect(index: &MemoryPushIndex, opts: IterateOptions) -> Vec<u64> {
        let mut seen = Vec::new();
        index
            .iterate(opts, &mut |item| {
                seen.push(item.key.0);
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        seen
    }

    #[test]
    fn iterates_in_key_order_across_pages() {
        let index = MemoryPushIndex::new(2);
        for seq in [5, 1, 3, 2, 4] {
            index.insert(item(seq, &format!("c{seq}"))).unwrap();
        }
        assert_eq!(collect(&index, IterateOptions::default()), vec![1, 2, 3, 4, 5]);
        assert_eq!(index.last_key().unwrap(), Some(PushKey(5)));
    }

    #[test]
    fn start_from_honours_skip_flag() {
        let index = MemoryPushIndex::new(64);
        for seq in 1..=4 {
            index.insert(item(seq, &format!("c{seq}"))).unwrap();
        }

        let inclusive = IterateOptions {
            start_from: Some(PushKey(2)),
            skip_start_from: false,
        };
        assert_eq!(collect(&index, inclusive), vec![2, 3, 4]);
        assert_eq!(collect(&index, IterateOptions::after(Some(PushKey(2)))), vec![3, 4]);
        assert_eq!(collect(&index, IterateOptions::after(None)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn skip_start_works_when_start_item_was_removed() {
        let index = MemoryPushIndex::new(64);
        for seq in 1..=3 {
            index.insert(item(seq, &format!("c{seq}"))).unwrap();
        }
        assert!(index.remove(&Address::of(b"c2")).unwrap());
        assert!(!index.remove(&Address::of(b"c2")).unwrap());
        assert_eq!(collect(&index, IterateOptions::after(Some(PushKey(2)))), vec![3]);
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn break_and_error_stop_iteration() {
        let index = MemoryPushIndex::new(1);
        for seq in 1..=3 {
            index.insert(item(seq, &format!("c{seq}"))).unwrap();
        }

        let mut visited = 0;
        index
            .iterate(IterateOptions::default(), &mut |_| {
                visited += 1;
                Ok(ControlFlow::Break(()))
            })
            .unwrap();
        assert_eq!(visited, 1);

        let err = index
            .iterate(IterateOptions::default(), &mut |item| Err(StorageError::NotFound(item.address)))
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn visitor_can_insert_without_deadlock() {
        let index = MemoryPushIndex::new(64);
        index.insert(item(1, "c1")).unwrap();

        let mut seen = Vec::new();
        index
            .iterate(IterateOptions::default(), &mut |it| {
                seen.push(it.key.0);
                if it.key.0 == 1 {
                    index.insert(item(2, "c2"))?;
                }
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let index = MemoryPushIndex::default();
        index.insert(item(1, "same")).unwrap();
        let err = index.insert(item(2, "same")).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
    }

    #[test]
    fn retrieval_get_missing_is_not_found() {
        let retrieval = MemoryRetrievalIndex::default();
        let addr = Address::of(b"missing");
        assert!(!retrieval.has(&addr).unwrap());
        assert!(matches!(retrieval.get(&addr).unwrap_err(), StorageError::NotFound(a) if a == addr));

        retrieval
            .put(DataRecord {
                address: addr,
                location: vec![0; Location::ENCODED_LEN],
                batch_id: BatchId::default(),
                index: [0; 8],
                timestamp: [0; 8],
                signature: Vec::new(),
            })
            .unwrap();
        assert!(retrieval.has(&addr).unwrap());

        assert!(retrieval.remove(&addr).unwrap());
        assert!(!retrieval.remove(&addr).unwrap());
        assert!(!retrieval.has(&addr).unwrap());
    }

    #[test]
    fn blob_write_read_release_reuses_slot() {
        let blobs = MemoryBlobStore::new(1);
        let scope = Scope::new();

        let loc = blobs.write(b"abcdef").unwrap();
        assert_eq!(loc.length, 6);

        let mut buf = vec![0u8; usize::from(loc.length)];
        blobs.read(&scope, loc, &mut buf).unwrap();
        assert_eq!(buf, b"abcdef");

        blobs.release(loc).unwrap();
        assert!(matches!(blobs.read(&scope, loc, &mut buf).unwrap_err(), StorageError::OutOfBounds(_)));
        assert!(blobs.release(loc).is_err());

        let reused = blobs.write(b"xyz").unwrap();
        assert_eq!(reused.slot, loc.slot);
    }

    #[test]
    fn blob_writes_rotate_across_shards() {
        let blobs = MemoryBlobStore::new(3);
        let shards: Vec<u8> = (0..6).map(|i| blobs.write(&[i]).unwrap().shard).collect();
        assert_eq!(shards, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn blob_read_checks_scope_and_buffer() {
        let blobs = MemoryBlobStore::new(1);
        let loc = blobs.write(b"payload").unwrap();

        let mut small = [0u8; 3];
        assert!(matches!(
            blobs.read(&Scope::new(), loc, &mut small).unwrap_err(),
            StorageError::ShortBuffer { need: 7, have: 3 }
        ));

        let scope = Scope::new();
        scope.cancel();
        let mut buf = [0u8; 7];
        assert!(matches!(blobs.read(&scope, loc, &mut buf).unwrap_err(), StorageError::Cancelled));

        let bogus = Location { shard: 9, ..loc };
        assert!(matches!(blobs.read(&Scope::new(), bogus, &mut buf).unwrap_err(), StorageError::OutOfBounds(_)));
    }

    #[test]
    fn blob_rejects_oversized_payload() {
        let blobs = MemoryBlobStore::new(1);
        let big = vec![0u8; usize::from(u16::MAX) + 1];
        assert!(matches!(blobs.write(&big).unwrap_err(), StorageError::PayloadTooLarge { .. }));
    }
}
