//! Local store and push subscription configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for the local store and its push subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Pause applied by `reset` before the checkpoint is discarded.
    pub reset_backoff: Duration,
    /// How long `close` waits for iteration tasks to exit.
    pub close_timeout: Duration,
    /// Items read from the in-memory push index per lock acquisition.
    pub index_page_size: usize,
    /// Number of shards in the in-memory blob store.
    pub blob_shards: u8,
    /// Largest payload accepted by `put`.
    pub max_payload_size: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reset_backoff: Duration::from_secs(1),
            close_timeout: Duration::from_secs(15),
            index_page_size: 64,
            blob_shards: 4,
            max_payload_size: Self::DEFAULT_PAYLOAD_SIZE,
        }
    }
}

impl PushConfig {
    /// 4 KiB of data plus the 8-byte span prefix.
    pub const DEFAULT_PAYLOAD_SIZE: usize = 4096 + 8;

    const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

    /// Checks the configuration, returning it unchanged when valid.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.index_page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.blob_shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        if self.max_payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ConfigError::PayloadLimitTooLarge {
                value: self.max_payload_size,
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }
        Ok(self)
    }

    /// Returns a copy with a different reset backoff.
    #[must_use]
    pub fn with_reset_backoff(mut self, backoff: Duration) -> Self {
        self.reset_backoff = backoff;
        self
    }

    /// Returns a copy with a different close timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = PushConfig::default().validate().unwrap();
        assert_eq!(cfg.reset_backoff, Duration::from_secs(1));
        assert_eq!(cfg.max_payload_size, 4104);
    }

    #[test]
    fn rejects_zero_page_size() {
        let cfg = PushConfig {
            index_page_size: 0,
            ..PushConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroPageSize);
    }

    #[test]
    fn rejects_zero_shards() {
        let cfg = PushConfig {
            blob_shards: 0,
            ..PushConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroShards);
    }

    #[test]
    fn rejects_payload_limit_beyond_location_length() {
        let cfg = PushConfig {
            max_payload_size: 70_000,
            ..PushConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::PayloadLimitTooLarge { value: 70_000, .. }
        ));
    }
}
