//! Redis configuration (cache, queue, refresh sessions).

use serde::Deserialize;

use super::error::ValidationError;

/// Key-value store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.starts_with("redis://") || self.url.starts_with("rediss://") {
            Ok(())
        } else {
            Err(ValidationError::InvalidRedisUrl)
        }
    }
}
