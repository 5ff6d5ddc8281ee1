//! Cache port: byte-level KV with TTL.
//!
//! The trait works in raw bytes so it stays object-safe; the typed JSON
//! helpers below are what call sites actually use. A miss is `Ok(None)` and
//! is never treated as fatal; only transport or serialization problems are
//! errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Cache failures. Misses are not errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Byte-level cache operations.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch raw bytes. `Ok(None)` is a miss.
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store raw bytes with a TTL.
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<(), CacheError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Fetch and deserialize a cached value.
pub async fn get_cached<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get_bytes(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize and store a value with a TTL.
pub async fn set_cached<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value)?;
    cache.set_bytes(key, bytes, ttl).await
}

/// Remove a cached value.
pub async fn delete_cached(cache: &dyn Cache, key: &str) -> Result<(), CacheError> {
    cache.delete(key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Test double storing entries without expiry.
    pub struct MapCache {
        entries: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapCache {
        pub fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Cache for MapCache {
        async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn set_bytes(
            &self,
            key: &str,
            value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.entries.lock().await.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let cache = MapCache::new();
        set_cached(&cache, "k", &vec![1u32, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();

        let got: Option<Vec<u32>> = get_cached(&cache, "k").await.unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn miss_is_none_not_error() {
        let cache = MapCache::new();
        let got: Option<String> = get_cached(&cache, "absent").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn delete_then_get_misses() {
        let cache = MapCache::new();
        set_cached(&cache, "k", &"v", Duration::from_secs(60))
            .await
            .unwrap();
        delete_cached(&cache, "k").await.unwrap();

        let got: Option<String> = get_cached(&cache, "k").await.unwrap();
        assert!(got.is_none());
    }
}
