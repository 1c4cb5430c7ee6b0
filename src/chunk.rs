//! Chunk envelope and addressing types.
//!
//! A [`Chunk`] is the unit handed to push subscribers: its content address,
//! the payload bytes, the upload tag it was stored under, and the postage
//! [`Stamp`] that authorizes it. Envelopes are built fresh for every
//! delivery and are never shared between subscriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of a content address in bytes.
pub const ADDRESS_LEN: usize = 32;

/// Size of a postage batch identifier in bytes.
pub const BATCH_ID_LEN: usize = 32;

/// Content address of a chunk.
///
/// # Examples
///
/// ```
/// use chunkpush::Address;
///
/// let addr = Address::of(b"hello");
/// assert_eq!(addr, Address::of(b"hello"));
/// assert_ne!(addr, Address::zero());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Wraps raw address bytes.
    #[must_use]
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the content address of a payload.
    #[must_use]
    pub fn of(payload: &[u8]) -> Self {
        Self(*blake3::hash(payload).as_bytes())
    }

    /// The all-zero address (sentinel for tests and empty slots).
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; ADDRESS_LEN])
    }

    /// Returns the address bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Returns true if this is the all-zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Upload tag a chunk was stored under. `0` means untagged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub u32);

impl TagId {
    /// The untagged sentinel.
    pub const NONE: Self = Self(0);

    /// Returns true if the chunk carries no upload tag.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Postage batch identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub [u8; BATCH_ID_LEN]);

/// Postage stamp attached to a stored chunk.
///
/// The store treats every field as opaque: it is recorded on `put` and
/// handed back unchanged on delivery. Verification happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    /// Batch the stamp was issued from.
    pub batch_id: BatchId,
    /// Bucket and position within the batch.
    pub index: [u8; 8],
    /// Issuance time, big-endian unix nanoseconds.
    pub timestamp: [u8; 8],
    /// Owner signature over the stamp.
    pub signature: Vec<u8>,
}

impl Stamp {
    /// Creates a stamp from its parts.
    #[must_use]
    pub fn new(batch_id: BatchId, index: [u8; 8], timestamp: [u8; 8], signature: Vec<u8>) -> Self {
        Self {
            batch_id,
            index,
            timestamp,
            signature,
        }
    }

    /// Issuance time as unix nanoseconds.
    #[must_use]
    pub fn timestamp_nanos(&self) -> u64 {
        u64::from_be_bytes(self.timestamp)
    }
}

/// The delivered envelope: address, payload, tag and stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    data: Vec<u8>,
    tag: TagId,
    stamp: Option<Stamp>,
}

impl Chunk {
    /// Creates an untagged, unstamped chunk.
    #[must_use]
    pub fn new(address: Address, data: Vec<u8>) -> Self {
        Self {
            address,
            data,
            tag: TagId::NONE,
            stamp: None,
        }
    }

    /// Creates a chunk addressed by the hash of its payload.
    #[must_use]
    pub fn content_addressed(data: Vec<u8>) -> Self {
        Self::new(Address::of(&data), data)
    }

    /// Sets the upload tag.
    #[must_use]
    pub fn with_tag(mut self, tag: TagId) -> Self {
        self.tag = tag;
        self
    }

    /// Attaches a postage stamp.
    #[must_use]
    pub fn with_stamp(mut self, stamp: Stamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    /// Content address.
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Upload tag, `TagId::NONE` when untagged.
    #[must_use]
    pub const fn tag(&self) -> TagId {
        self.tag
    }

    /// Postage stamp, if one was attached.
    #[must_use]
    pub const fn stamp(&self) -> Option<&Stamp> {
        self.stamp.as_ref()
    }

    /// Consumes the chunk, returning its payload.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_lowercase_hex() {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let addr = Address::new(bytes);
        let s = addr.to_string();
        assert_eq!(s.len(), ADDRESS_LEN * 2);
        assert!(s.starts_with("ab00"));
        assert!(s.ends_with("01"));
    }

    #[test]
    fn content_address_is_blake3_of_payload() {
        let chunk = Chunk::content_addressed(b"payload".to_vec());
        assert_eq!(chunk.address().as_bytes(), blake3::hash(b"payload").as_bytes());
        assert!(chunk.tag().is_none());
        assert!(chunk.stamp().is_none());
    }

    #[test]
    fn builder_sets_tag_and_stamp() {
        let stamp = Stamp::new(BatchId([7u8; BATCH_ID_LEN]), [0, 0, 0, 0, 0, 0, 0, 3], 42u64.to_be_bytes(), vec![1, 2, 3]);
        let chunk = Chunk::content_addressed(vec![9; 16])
            .with_tag(TagId(5))
            .with_stamp(stamp.clone());

        assert_eq!(chunk.tag(), TagId(5));
        assert_eq!(chunk.stamp(), Some(&stamp));
        assert_eq!(chunk.stamp().map(Stamp::timestamp_nanos), Some(42));
        assert_eq!(chunk.into_data(), vec![9; 16]);
    }

    #[test]
    fn zero_address_is_zero() {
        assert!(Address::zero().is_zero());
        assert!(!Address::of(b"").is_zero());
    }
}
