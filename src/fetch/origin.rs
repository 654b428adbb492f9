//! Origin trait for the authoritative upstream data source.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CacheKey;
use crate::error::OriginError;

/// Parameters identifying one logical resource, e.g. `{city, units}`.
pub type ResourceParams = BTreeMap<String, String>;

/// An upstream source consulted on cache misses.
///
/// The coordinator bounds every `fetch` with its own timeout, so
/// implementations need not impose one.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Payload produced by the origin and stored in the cache as JSON.
    type Value: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Prefix for this origin's cache keys.
    fn namespace(&self) -> &str;

    /// Cache key for a request. Equal parameters must give equal keys and
    /// parameters that change the result must give different ones.
    fn cache_key(&self, params: &ResourceParams) -> CacheKey {
        CacheKey::derive(self.namespace(), params)
    }

    /// Fetch the resource from upstream.
    async fn fetch(&self, params: &ResourceParams) -> Result<Self::Value, OriginError>;
}
