//! Admission, cache lookup and origin fallback for one resource request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::origin::{Origin, ResourceParams};
use crate::cache::{CacheAsideStore, CacheKey};
use crate::error::OriginError;
use crate::ratelimit::SlidingWindowLimiter;

/// Outcome of a resolve call that did not fail at the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// Served from the cache.
    CacheHit(T),
    /// Fetched from the origin (and handed to the cache).
    OriginFetched(T),
    /// The client is over its quota; nothing was looked up.
    AdmissionDenied,
}

impl<T> Resolution<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Resolution::CacheHit(v) | Resolution::OriginFetched(v) => Some(v),
            Resolution::AdmissionDenied => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Resolution::CacheHit(v) | Resolution::OriginFetched(v) => Some(v),
            Resolution::AdmissionDenied => None,
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Resolution::CacheHit(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Resolution::AdmissionDenied)
    }
}

/// Tuning for [`FetchCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Maximum wait for one origin fetch.
    pub origin_timeout: Duration,
    /// Write fetched values to the cache on a spawned task instead of inline.
    pub populate_in_background: bool,
}

impl CoordinatorOptions {
    pub fn new(origin_timeout: Duration) -> Self {
        Self {
            origin_timeout,
            populate_in_background: false,
        }
    }

    pub fn with_background_population(mut self, enabled: bool) -> Self {
        self.populate_in_background = enabled;
        self
    }
}

/// Composes the limiter, the cache and an origin.
///
/// The limiter is consulted first and its lock is released before any cache
/// or origin I/O. Only origin failures reach the caller; the origin is never
/// retried here.
pub struct FetchCoordinator<O: Origin> {
    limiter: Arc<SlidingWindowLimiter>,
    store: CacheAsideStore,
    origin: Arc<O>,
    options: CoordinatorOptions,
}

impl<O: Origin + 'static> FetchCoordinator<O> {
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        store: CacheAsideStore,
        origin: Arc<O>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            limiter,
            store,
            origin,
            options,
        }
    }

    /// Resolve a resource for `client`.
    pub async fn resolve(
        &self,
        client: &str,
        params: &ResourceParams,
    ) -> Result<Resolution<O::Value>, OriginError> {
        self.resolve_until(client, params, std::future::pending()).await
    }

    /// Resolve a resource, giving up on the origin once `cancel` completes.
    ///
    /// A consumed admission slot is not returned on cancellation.
    #[instrument(skip(self, params, cancel))]
    pub async fn resolve_until<F>(
        &self,
        client: &str,
        params: &ResourceParams,
        cancel: F,
    ) -> Result<Resolution<O::Value>, OriginError>
    where
        F: Future<Output = ()> + Send,
    {
        if !self.limiter.allow(client) {
            info!(client = %client, "Admission denied");
            return Ok(Resolution::AdmissionDenied);
        }

        let key = self.origin.cache_key(params);
        if let Some(value) = self.store.get_json::<O::Value>(key.as_str()).await {
            return Ok(Resolution::CacheHit(value));
        }

        let timeout = self.options.origin_timeout;
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, self.origin.fetch(params)) => Some(result),
            _ = cancel => None,
        };

        let value = match outcome {
            Some(Ok(Ok(value))) => value,
            Some(Ok(Err(e))) => {
                warn!(key = %key, error = %e, "Origin fetch failed");
                return Err(e);
            }
            Some(Err(_)) => {
                warn!(key = %key, timeout = ?timeout, "Origin fetch timed out");
                return Err(OriginError::Timeout(timeout));
            }
            None => {
                debug!(key = %key, "Origin fetch cancelled by caller");
                return Err(OriginError::Cancelled);
            }
        };

        self.populate(key, &value).await;
        Ok(Resolution::OriginFetched(value))
    }

    async fn populate(&self, key: CacheKey, value: &O::Value) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to marshal cache data");
                return;
            }
        };

        if self.options.populate_in_background {
            let store = self.store.clone();
            tokio::spawn(async move {
                store.set(key.as_str(), &bytes).await;
            });
        } else {
            self.store.set(key.as_str(), &bytes).await;
        }
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    pub fn store(&self) -> &CacheAsideStore {
        &self.store
    }

    pub fn origin(&self) -> &Arc<O> {
        &self.origin
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, MemoryBackend, NullBackend};
    use crate::error::CacheError;
    use crate::ratelimit::LimiterConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(43200);

    /// Origin returning a fixed payload and counting calls.
    struct CountingOrigin {
        calls: AtomicUsize,
        payload: Result<String, OriginError>,
        delay: Duration,
    }

    impl CountingOrigin {
        fn returning(payload: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                payload: Ok(payload.to_string()),
                delay: Duration::ZERO,
            }
        }

        fn failing(error: OriginError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                payload: Err(error),
                delay: Duration::ZERO,
            }
        }

        fn slow(payload: &str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::returning(payload)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Origin for CountingOrigin {
        type Value = String;

        fn namespace(&self) -> &str {
            "weather"
        }

        async fn fetch(&self, _params: &ResourceParams) -> Result<String, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.payload.clone()
        }
    }

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

    fn paris() -> ResourceParams {
        [("city", "Paris"), ("units", "metric")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn coordinator(
        limit: u32,
        backend: Arc<dyn CacheBackend>,
        origin: Arc<CountingOrigin>,
    ) -> FetchCoordinator<CountingOrigin> {
        let limiter = SlidingWindowLimiter::new(
            LimiterConfig::new(limit, Duration::from_secs(1)).unwrap(),
        );
        FetchCoordinator::new(
            Arc::new(limiter),
            CacheAsideStore::new(backend, TTL),
            origin,
            CoordinatorOptions::new(Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let coordinator = coordinator(10, Arc::new(MemoryBackend::new()), origin.clone());

        let first = coordinator.resolve("A", &paris()).await.unwrap();
        assert_eq!(first, Resolution::OriginFetched("P".to_string()));
        assert_eq!(
            coordinator.store().get("weather:city=paris:units=metric").await,
            Some(b"\"P\"".to_vec())
        );

        let second = coordinator.resolve("A", &paris()).await.unwrap();
        assert_eq!(second, Resolution::CacheHit("P".to_string()));
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_denial_short_circuits_before_cache_and_origin() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let coordinator = coordinator(1, Arc::new(MemoryBackend::new()), origin.clone());

        let first = coordinator.resolve("A", &paris()).await.unwrap();
        assert!(matches!(first, Resolution::OriginFetched(_)));

        let second = coordinator.resolve("A", &paris()).await.unwrap();
        assert_eq!(second, Resolution::AdmissionDenied);
        assert_eq!(second.value(), None);

        assert_eq!(origin.calls(), 1);
        // Only the first call looked at the cache
        let stats = coordinator.store().stats();
        assert_eq!(stats.hits + stats.misses, 1);
    }

    #[tokio::test]
    async fn test_null_backend_always_fetches() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let coordinator = coordinator(10, Arc::new(NullBackend), origin.clone());

        for _ in 0..3 {
            let resolution = coordinator.resolve("A", &paris()).await.unwrap();
            assert_eq!(resolution, Resolution::OriginFetched("P".to_string()));
        }
        assert_eq!(origin.calls(), 3);
    }

    #[tokio::test]
    async fn test_broken_backend_does_not_fail_resolve() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let coordinator = coordinator(10, Arc::new(BrokenBackend), origin.clone());

        let resolution = coordinator.resolve("A", &paris()).await.unwrap();
        assert_eq!(resolution.into_value(), Some("P".to_string()));

        let stats = coordinator.store().stats();
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.write_errors, 1);
    }

    #[tokio::test]
    async fn test_origin_error_is_surfaced_and_not_cached() {
        let origin = Arc::new(CountingOrigin::failing(OriginError::Status {
            status: 400,
            body: "Bad API Request:Invalid location parameter value.".into(),
        }));
        let coordinator = coordinator(10, Arc::new(MemoryBackend::new()), origin.clone());

        let err = coordinator.resolve("A", &paris()).await.unwrap_err();
        assert!(matches!(err, OriginError::Status { status: 400, .. }));

        // Nothing was cached, so the next call goes to the origin again
        assert!(coordinator.resolve("A", &paris()).await.is_err());
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_timeout() {
        let origin = Arc::new(CountingOrigin::slow("P", Duration::from_secs(30)));
        let coordinator = coordinator(10, Arc::new(MemoryBackend::new()), origin.clone());

        let err = coordinator.resolve("A", &paris()).await.unwrap_err();
        assert_eq!(err, OriginError::Timeout(Duration::from_secs(1)));
        assert_eq!(coordinator.store().get("weather:city=paris:units=metric").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_admission_slot() {
        let origin = Arc::new(CountingOrigin::slow("P", Duration::from_millis(800)));
        let coordinator = coordinator(2, Arc::new(MemoryBackend::new()), origin.clone());

        let err = coordinator
            .resolve_until(
                "A",
                &paris(),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, OriginError::Cancelled);
        assert_eq!(coordinator.limiter().remaining("A"), 1);
    }

    #[tokio::test]
    async fn test_background_population() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let limiter = SlidingWindowLimiter::new(
            LimiterConfig::new(10, Duration::from_secs(1)).unwrap(),
        );
        let coordinator = FetchCoordinator::new(
            Arc::new(limiter),
            CacheAsideStore::new(Arc::new(MemoryBackend::new()), TTL),
            origin.clone(),
            CoordinatorOptions::new(Duration::from_secs(1)).with_background_population(true),
        );

        let first = coordinator.resolve("A", &paris()).await.unwrap();
        assert_eq!(first, Resolution::OriginFetched("P".to_string()));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let second = coordinator.resolve("A", &paris()).await.unwrap();
        assert!(second.is_cache_hit());
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_refetches() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let coordinator = coordinator(10, Arc::new(MemoryBackend::new()), origin.clone());
        coordinator.store().set("weather:city=paris:units=metric", b"{broken").await;

        let resolution = coordinator.resolve("A", &paris()).await.unwrap();
        assert_eq!(resolution, Resolution::OriginFetched("P".to_string()));
        assert_eq!(origin.calls(), 1);

        // The refetch overwrote the corrupt entry
        let resolution = coordinator.resolve("A", &paris()).await.unwrap();
        assert!(resolution.is_cache_hit());
    }

    #[tokio::test]
    async fn test_concurrent_misses_are_not_coalesced() {
        let origin = Arc::new(CountingOrigin::slow("P", Duration::from_millis(50)));
        let coordinator = coordinator(10, Arc::new(MemoryBackend::new()), origin.clone());
        let params = paris();

        let clients = ["A", "B", "C", "D"];
        let results = futures::future::join_all(
            clients.iter().map(|client| coordinator.resolve(client, &params)),
        )
        .await;

        for result in results {
            let resolution = tokio_test::assert_ok!(result);
            assert_eq!(resolution.into_value(), Some("P".to_string()));
        }
        // Every concurrent miss reached the origin
        assert_eq!(origin.calls(), clients.len());
    }

    #[tokio::test]
    async fn test_clients_do_not_share_quota_but_share_cache() {
        let origin = Arc::new(CountingOrigin::returning("P"));
        let coordinator = coordinator(1, Arc::new(MemoryBackend::new()), origin.clone());

        assert!(matches!(
            coordinator.resolve("A", &paris()).await.unwrap(),
            Resolution::OriginFetched(_)
        ));
        assert!(coordinator.resolve("B", &paris()).await.unwrap().is_cache_hit());
        assert!(coordinator.resolve("A", &paris()).await.unwrap().is_denied());
        assert_eq!(origin.calls(), 1);
    }
}
