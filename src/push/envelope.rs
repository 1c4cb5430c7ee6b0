//! Resolves index entries into deliverable chunks.

use std::sync::Arc;

use crate::chunk::{Address, Chunk, TagId};
use crate::scope::Scope;
use crate::storage::{BlobStore, Location, RetrievalIndex, StorageError};

/// Reads the retrieval record and payload for an address and assembles the envelope.
#[derive(Clone)]
pub(crate) struct ChunkSource {
    retrieval: Arc<dyn RetrievalIndex>,
    blobs: Arc<dyn BlobStore>,
}

impl ChunkSource {
    pub(crate) fn new(retrieval: Arc<dyn RetrievalIndex>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { retrieval, blobs }
    }

    pub(crate) fn resolve(&self, scope: &Scope, address: &Address, tag: TagId) -> Result<Chunk, StorageError> {
        let record = self.retrieval.get(address)?;
        let location = Location::from_binary(&record.location)?;

        let mut data = vec![0u8; usize::from(location.length)];
        self.blobs.read(scope, location, &mut data)?;

        Ok(record.into_chunk(data, tag))
    }
}
