//! Cache-aside storage with pluggable backends.
//!
//! [`CacheAsideStore`] is the only type the rest of the crate talks to. It
//! wraps a [`CacheBackend`] (Redis, in-memory, or the null backend used when
//! caching is unavailable) and never lets a backend failure reach its caller.

mod backend;
mod key;
mod memory;
mod redis_backend;
mod store;

pub use backend::{CacheBackend, NullBackend};
pub use key::CacheKey;
pub use memory::{CacheEntry, MemoryBackend};
pub use redis_backend::RedisBackend;
pub use store::{CacheAsideStore, CacheStats, CacheStatsSnapshot};
