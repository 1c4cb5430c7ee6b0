//! Blob location references and their binary form.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::traits::StorageError;

/// Where a payload lives inside a [`super::BlobStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Shard index.
    pub shard: u8,
    /// Slot within the shard.
    pub slot: u32,
    /// Payload length in bytes.
    pub length: u16,
}

impl Location {
    /// Size of the binary encoding.
    pub const ENCODED_LEN: usize = 7;

    /// Encodes as `[shard][slot: u32 BE][length: u16 BE]`.
    #[must_use]
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.push(self.shard);
        out.extend_from_slice(&self.slot.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decodes the form produced by [`Location::to_binary`].
    pub fn from_binary(buf: &[u8]) -> Result<Self, StorageError> {
        let bytes: &[u8; Self::ENCODED_LEN] = buf
            .try_into()
            .map_err(|_| StorageError::InvalidLocation { len: buf.len() })?;

        Ok(Self {
            shard: bytes[0],
            slot: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            length: u16::from_be_bytes([bytes[5], bytes[6]]),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard: {}, slot: {}, length: {}", self.shard, self.slot, self.length)
    }
}
