//! Error types for the weather proxy.

use std::time::Duration;

use thiserror::Error;

/// Main error type for startup, configuration and server operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Origin client construction errors
    #[error("Origin error: {0}")]
    Origin(#[from] OriginError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ProxyError {
    fn from(err: config::ConfigError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

/// Failure of the upstream origin fetch.
///
/// This is the only failure a resolve call surfaces to its caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    /// The origin did not answer within the configured timeout.
    #[error("origin timed out after {0:?}")]
    Timeout(Duration),

    /// The origin answered with a non-success status.
    #[error("origin returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The origin payload could not be decoded.
    #[error("malformed origin payload: {0}")]
    Malformed(String),

    /// The request never produced a response (connect, DNS, TLS...).
    #[error("origin transport error: {0}")]
    Transport(String),

    /// The caller gave up waiting.
    #[error("origin fetch cancelled")]
    Cancelled,

    /// No API key configured for the origin.
    #[error("origin API key is not configured")]
    MissingApiKey,

    /// The resource parameters cannot be turned into an origin request.
    #[error("invalid origin request: {0}")]
    InvalidRequest(String),
}

/// Internal cache failure. Never leaves the cache module's store layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No backend connection is available.
    #[error("cache backend unavailable")]
    Unavailable,

    /// The Redis backend returned an error.
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// A value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
