//! Weather Proxy - rate-limited, cache-aside weather API
//!
//! Incoming requests pass a per-client sliding window limiter, are served
//! from a Redis-backed cache when possible, and otherwise fetched from the
//! upstream weather API under a timeout. A cache outage never fails a
//! request; it only sends more traffic to the origin.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod ratelimit;
pub mod weather;
