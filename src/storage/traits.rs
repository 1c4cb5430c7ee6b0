//! Abstract storage traits for the local chunk store.
//!
//! These traits are the contract push subscriptions consume. The in-memory
//! backends in [`super::memory`] implement them for embedded use and tests;
//! a durable backend only has to honour the same ordering and
//! skip-start semantics.

use std::ops::ControlFlow;

use thiserror::Error;

use crate::chunk::Address;
use crate::record::{DataRecord, PushItem, PushKey};
use crate::scope::Scope;

use super::location::Location;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record for the address.
    #[error("Chunk not found: {0}")]
    NotFound(Address),

    /// Address already present in an index that requires uniqueness.
    #[error("Duplicate address: {0}")]
    Duplicate(Address),

    /// Location bytes could not be decoded.
    #[error("Invalid location encoding: {len} bytes")]
    InvalidLocation {
        /// Length of the rejected buffer.
        len: usize,
    },

    /// Location does not refer to a stored payload.
    #[error("Location out of bounds: {0}")]
    OutOfBounds(Location),

    /// Destination buffer is smaller than the stored payload.
    #[error("Read buffer too small: need {need} bytes, have {have}")]
    ShortBuffer {
        /// Bytes the location refers to.
        need: usize,
        /// Bytes available in the destination.
        have: usize,
    },

    /// Payload exceeds what a location can describe.
    #[error("Payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The caller's scope ended before the read started.
    #[error("Read cancelled")]
    Cancelled,

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Where an index iteration starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterateOptions {
    /// Key to start from; `None` starts at the first item.
    pub start_from: Option<PushKey>,
    /// When set, the `start_from` item itself is not visited.
    pub skip_start_from: bool,
}

impl IterateOptions {
    /// Iterate strictly after `checkpoint`, or from the beginning when there is none.
    #[must_use]
    pub const fn after(checkpoint: Option<PushKey>) -> Self {
        Self {
            start_from: checkpoint,
            skip_start_from: true,
        }
    }
}

/// Per-item callback used by [`PushIndex::iterate`].
///
/// Returning `ControlFlow::Break(())` or an error stops the iteration.
pub type ItemVisitor<'a> = dyn FnMut(&PushItem) -> Result<ControlFlow<()>, StorageError> + 'a;

/// Insertion-ordered index of chunks awaiting push.
///
/// # Ordering
/// `iterate` must visit items in ascending [`PushKey`] order and must not hold
/// any lock that blocks `insert` while the visitor runs: visitors may block for
/// as long as a subscriber takes to accept a chunk.
pub trait PushIndex: Send + Sync {
    /// Insert a new item. Returns error if the address is already indexed.
    fn insert(&self, item: PushItem) -> Result<(), StorageError>;

    /// Remove the item for an address. Returns true if it was present.
    fn remove(&self, address: &Address) -> Result<bool, StorageError>;

    /// Number of indexed items.
    fn len(&self) -> Result<usize, StorageError>;

    /// Highest key currently indexed, if any.
    fn last_key(&self) -> Result<Option<PushKey>, StorageError>;

    /// Visit items in key order starting at `opts`.
    fn iterate(&self, opts: IterateOptions, visit: &mut ItemVisitor<'_>) -> Result<(), StorageError>;
}

/// Address-keyed retrieval records.
pub trait RetrievalIndex: Send + Sync {
    /// Insert or replace the record for its address.
    fn put(&self, record: DataRecord) -> Result<(), StorageError>;

    /// Get the record for an address. Returns `NotFound` if absent.
    fn get(&self, address: &Address) -> Result<DataRecord, StorageError>;

    /// Returns true if a record exists for the address.
    fn has(&self, address: &Address) -> Result<bool, StorageError>;

    /// Remove the record for an address. Returns true if it was present.
    fn remove(&self, address: &Address) -> Result<bool, StorageError>;
}

/// Payload storage addressed by [`Location`].
pub trait BlobStore: Send + Sync {
    /// Store a payload and return where it lives.
    fn write(&self, data: &[u8]) -> Result<Location, StorageError>;

    /// Copy the payload at `location` into `buf`.
    ///
    /// `buf` must be at least `location.length` bytes. Implementations check
    /// `scope` before starting; a read in progress is not interrupted.
    fn read(&self, scope: &Scope, location: Location, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Free the slot at `location` for reuse.
    fn release(&self, location: Location) -> Result<(), StorageError>;
}
