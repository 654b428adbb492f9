//! Read-through cache store that never fails its caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, NullBackend};
use super::redis_backend::RedisBackend;

/// How long startup waits for Redis before running without a cache.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Cache-aside wrapper around a [`CacheBackend`].
///
/// Backend failures are logged and absorbed: a failed read is a miss and a
/// failed write is dropped. All entries share the store's TTL.
#[derive(Clone)]
pub struct CacheAsideStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    stats: Arc<CacheStats>,
}

/// Counters for cache activity.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub read_errors: u64,
    pub write_errors: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CacheAsideStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAsideStore")
            .field("backend", &self.backend.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CacheAsideStore {
    /// Create a store over an explicit backend.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Create a store with caching disabled.
    pub fn disabled(ttl: Duration) -> Self {
        Self::new(Arc::new(NullBackend), ttl)
    }

    /// Connect to Redis, falling back to a disabled store if that fails.
    pub async fn connect(url: &str, ttl: Duration) -> Self {
        match tokio::time::timeout(CONNECT_TIMEOUT, RedisBackend::connect(url)).await {
            Ok(Ok(backend)) => Self::new(Arc::new(backend), ttl),
            Ok(Err(e)) => {
                warn!(error = %e, "Redis initialization failed, running without cache");
                Self::disabled(ttl)
            }
            Err(_) => {
                warn!(
                    timeout = ?CONNECT_TIMEOUT,
                    "Redis connection timed out, running without cache"
                );
                Self::disabled(ttl)
            }
        }
    }

    /// Read raw bytes. Any backend problem is reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, backend = self.backend.name(), error = %e, "Cache get error");
                None
            }
        }
    }

    /// Write raw bytes with the store's TTL. Failures are logged only.
    pub async fn set(&self, key: &str, value: &[u8]) {
        match self.backend.set(key, value, self.ttl).await {
            Ok(()) => {
                if self.backend.is_available() {
                    debug!(key = %key, ttl = ?self.ttl, "Cached value");
                }
            }
            Err(e) => {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, backend = self.backend.name(), error = %e, "Failed to set cache");
            }
        }
    }

    /// Remove a key. Failures are logged only.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(
                key = %key,
                backend = self.backend.name(),
                error = %e,
                "Failed to delete cache key"
            );
        }
    }

    /// Read and decode a JSON value. Undecodable bytes count as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache unmarshal error");
                None
            }
        }
    }

    /// Encode a value as JSON and write it.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes).await,
            Err(e) => {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to marshal cache data");
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `false` when running on the null backend.
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Log whether caching is active.
    pub fn log_mode(&self) {
        if self.is_available() {
            info!(backend = self.backend_name(), ttl = ?self.ttl, "Cache enabled");
        } else {
            info!("Cache disabled, every request goes to the origin");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::error::CacheError;
    use async_trait::async_trait;
    use serde::Deserialize;

    const TTL: Duration = Duration::from_secs(60);

    /// Backend whose every call fails, like a Redis server that went away.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable)
        }

        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable)
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable)
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Report {
        city: String,
        temp: f64,
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_until_ttl() {
        let store = CacheAsideStore::new(Arc::new(MemoryBackend::new()), TTL);

        store.set("weather:paris:metric", b"P").await;
        assert_eq!(store.get("weather:paris:metric").await, Some(b"P".to_vec()));

        tokio::time::advance(TTL).await;
        assert_eq!(store.get("weather:paris:metric").await, None);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_disabled_store_misses_and_accepts_writes() {
        let store = CacheAsideStore::disabled(TTL);
        assert!(!store.is_available());

        store.set("key", b"value").await;
        assert_eq!(store.get("key").await, None);
        assert_eq!(store.stats().write_errors, 0);
    }

    #[tokio::test]
    async fn test_backend_errors_are_absorbed() {
        let store = CacheAsideStore::new(Arc::new(BrokenBackend), TTL);

        assert_eq!(store.get("key").await, None);
        store.set("key", b"value").await;
        store.delete("key").await;

        let stats = store.stats();
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let store = CacheAsideStore::new(Arc::new(MemoryBackend::new()), TTL);
        let report = Report {
            city: "Paris".into(),
            temp: 18.5,
        };

        store.set_json("weather:paris:metric", &report).await;
        let cached: Option<Report> = store.get_json("weather:paris:metric").await;
        assert_eq!(cached, Some(report));
    }

    #[tokio::test]
    async fn test_undecodable_json_is_a_miss() {
        let store = CacheAsideStore::new(Arc::new(MemoryBackend::new()), TTL);
        store.set("weather:paris:metric", b"{not json").await;

        let cached: Option<Report> = store.get_json("weather:paris:metric").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_disabled() {
        let store = CacheAsideStore::connect("redis://127.0.0.1:1", TTL).await;
        assert!(!store.is_available());
        assert_eq!(store.backend_name(), "none");
        assert_eq!(store.get("key").await, None);
    }
}
