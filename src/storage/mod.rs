//! Storage collaborators of the local chunk store.
//!
//! The traits define what push subscriptions need from the push index, the
//! retrieval index and the blob store. In-memory implementations live in
//! [`memory`].

mod location;
pub mod memory;
mod traits;

pub use location::Location;
pub use memory::{InMemoryStores, MemoryBlobStore, MemoryPushIndex, MemoryRetrievalIndex};
pub use traits::{BlobStore, ItemVisitor, IterateOptions, PushIndex, RetrievalIndex, StorageError};
