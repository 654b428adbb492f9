//! Cache backend trait for abstracting Redis, in-memory and disabled caching.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Key-value storage with per-write expiry.
///
/// Implementations handle their own concurrency; callers share one backend
/// across tasks without extra locking.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a value. `Ok(None)` means not found or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write a value, replacing any previous one, expiring after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value if present.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Short name used in logs and health output.
    fn name(&self) -> &'static str;

    /// `false` only for the null backend.
    fn is_available(&self) -> bool {
        true
    }
}

/// Backend used when caching is disabled or Redis could not be reached.
///
/// Reads always miss and writes succeed without storing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

#[async_trait]
impl CacheBackend for NullBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_backend_always_misses() {
        let backend = NullBackend;

        backend
            .set("weather:paris:metric", b"payload", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("weather:paris:metric").await.unwrap(), None);
        backend.delete("weather:paris:metric").await.unwrap();
        assert!(!backend.is_available());
    }
}
