//! Records kept by the push and retrieval indexes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::{Address, BatchId, Chunk, Stamp, TagId};

/// Ordering key of the push index.
///
/// Keys are assigned on admission from a strictly increasing sequence, so key
/// order is admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushKey(pub u64);

impl PushKey {
    /// Returns the key that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PushKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entry in the push index: a chunk that still has to be pushed upstream.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushItem {
    pub key: PushKey,
    pub address: Address,
    pub tag: TagId,
    pub stored_at: DateTime<Utc>,
}

/// Retrieval record: where a chunk's payload lives and the stamp it came with.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub address: Address,
    /// Binary-encoded [`crate::storage::Location`].
    pub location: Vec<u8>,
    pub batch_id: BatchId,
    pub index: [u8; 8],
    pub timestamp: [u8; 8],
    pub signature: Vec<u8>,
}

impl DataRecord {
    /// Rebuilds the stamp recorded alongside the payload.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.batch_id, self.index, self.timestamp, self.signature.clone())
    }

    /// Assembles the delivery envelope from this record and its payload.
    #[must_use]
    pub fn into_chunk(self, data: Vec<u8>, tag: TagId) -> Chunk {
        let stamp = Stamp::new(self.batch_id, self.index, self.timestamp, self.signature);
        Chunk::new(self.address, data).with_tag(tag).with_stamp(stamp)
    }
}
