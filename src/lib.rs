//! # chunkpush - ordered push subscriptions over a local chunk store
//!
//! A node stores content-addressed chunks locally and hands every newly stored
//! chunk to one or more pushers, which forward them to the network. chunkpush
//! provides the store and the subscription side of that hand-off.
//!
//! ## Core Concepts
//!
//! - **Chunk**: A payload addressed by its hash, with an upload tag and an optional postage stamp
//! - **Push index**: Insertion-ordered record of chunks not yet pushed
//! - **Push subscription**: A stream of chunks in push index order, driven by a private checkpoint
//! - **Trigger**: A non-blocking pulse that wakes every subscription after new admissions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chunkpush::{Chunk, LocalStore, PushConfig, Scope};
//!
//! let store = LocalStore::in_memory(PushConfig::default())?;
//! let sub = store.subscribe_push(&Scope::new(), |_| false);
//!
//! store.put(&Chunk::content_addressed(b"hello".to_vec()))?;
//!
//! let chunk = sub.recv().expect("stream open");
//! // forward the chunk, then mark it as pushed
//! store.set_synced(chunk.address())?;
//! sub.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod chunk;
pub mod config;
pub mod error;
pub mod record;
pub mod scope;

// Storage and delivery
pub mod push;
pub mod storage;
pub mod store;

// Re-export primary types at crate root for convenience
pub use chunk::{Address, BatchId, Chunk, Stamp, TagId};
pub use config::PushConfig;
pub use error::{ConfigError, PushError, PushResult};
pub use record::{DataRecord, PushItem, PushKey};
pub use scope::{Latch, Scope, ScopeError};
pub use store::LocalStore;

pub use push::{NotifyOutcome, PushControls, PushMetricsSnapshot, PushSubscription, SubscriptionId};
pub use storage::{
    BlobStore, InMemoryStores, IterateOptions, Location, PushIndex, RetrievalIndex, StorageError,
};
