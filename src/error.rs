//! Error types for chunkpush.
//!
//! Errors are layered the same way the store is: collaborator failures
//! surface as [`StorageError`], bad configuration as [`ConfigError`], and
//! everything the public API returns is wrapped in [`PushError`].
//!
//! Push subscriptions never return errors to their consumer. A failed
//! iteration is logged and the delivery stream is closed; these types only
//! appear on the direct `LocalStore` calls.

use thiserror::Error;

pub use crate::storage::StorageError;

/// Configuration validation errors.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("index_page_size must be at least 1")]
    ZeroPageSize,

    #[error("blob_shards must be at least 1")]
    ZeroShards,

    #[error("max_payload_size {value} exceeds the location length limit of {max}")]
    PayloadLimitTooLarge {
        value: usize,
        max: usize,
    },
}

/// Top-level error type for chunkpush.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("local store is closed")]
    Closed,

    #[error("push stream closed")]
    StreamClosed,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("local store closed with {remaining} push subscriptions still running")]
    ActiveSubscriptions {
        remaining: usize,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PushError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the store was already closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(e, StorageError::Cancelled | StorageError::Backend(_)),
            Self::ActiveSubscriptions { .. } | Self::Timeout { .. } => true,
            Self::Config(_) | Self::Closed | Self::StreamClosed | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for chunkpush operations.
pub type PushResult<T> = Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Address;

    #[test]
    fn test_config_error_payload_limit() {
        let err = ConfigError::PayloadLimitTooLarge { value: 70_000, max: 65_535 };
        let msg = format!("{err}");
        assert!(msg.contains("70000"));
        assert!(msg.contains("65535"));
    }

    #[test]
    fn test_push_error_from_storage() {
        let err: PushError = StorageError::NotFound(Address::zero()).into();
        assert!(err.is_storage());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn test_push_error_from_config() {
        let err: PushError = ConfigError::ZeroShards.into();
        assert!(!err.is_storage());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("blob_shards"));
    }

    #[test]
    fn test_push_error_closed() {
        let err = PushError::Closed;
        assert!(err.is_closed());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_push_error_retryable() {
        let err1: PushError = StorageError::Cancelled.into();
        assert!(err1.is_retryable());

        let err2 = PushError::ActiveSubscriptions { remaining: 2 };
        assert!(err2.is_retryable());
        assert!(format!("{err2}").contains('2'));

        let err3 = PushError::Timeout { duration_ms: 250 };
        assert!(err3.is_retryable());
        assert!(format!("{err3}").contains("250ms"));

        let err4 = PushError::internal("unexpected state");
        assert!(!err4.is_retryable());
        assert!(format!("{err4}").contains("unexpected state"));
    }
}
