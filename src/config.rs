//! Configuration management for the weather proxy.
//!
//! Settings come from an optional YAML file, overridden by environment
//! variables of the form `WEATHER_PROXY__<SECTION>__<KEY>`
//! (e.g. `WEATHER_PROXY__RATE_LIMITING__LIMIT=50`). The plain `PORT`,
//! `REDIS_ADDR` and `REDIS_PASSWORD` variables are honoured when the
//! corresponding prefixed variable is absent.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{ProxyError, Result};

const ENV_PREFIX: &str = "WEATHER_PROXY";

const PORT_ENV: &str = "PORT";
const REDIS_ADDR_ENV: &str = "REDIS_ADDR";
const REDIS_PASSWORD_ENV: &str = "REDIS_PASSWORD";
const HTTP_ADDR_ENV: &str = "WEATHER_PROXY__SERVER__HTTP_ADDR";
const REDIS_URL_ENV: &str = "WEATHER_PROXY__CACHE__REDIS_URL";

const DEFAULT_REDIS_ADDR: &str = "127.0.0.1:6379";

/// Main configuration for the weather proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upstream weather API configuration
    #[serde(default)]
    pub origin: OriginConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Identify clients by `X-Forwarded-For` / `X-Real-IP` instead of the
    /// peer address. Enable only behind a proxy that sets these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum admissions per client per window
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Background cleanup interval in seconds (defaults to the window length)
    #[serde(default)]
    pub cleanup_interval_secs: Option<u64>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            cleanup_interval_secs: None,
        }
    }
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval_secs.map(Duration::from_secs)
    }
}

fn default_limit() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    3600
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether to try connecting to Redis at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Lifetime of cached entries in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Write cache entries on a detached task instead of inline
    #[serde(default)]
    pub populate_in_background: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: default_redis_url(),
            ttl_secs: default_ttl_secs(),
            populate_in_background: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_redis_url() -> String {
    format!("redis://{}", DEFAULT_REDIS_ADDR)
}

fn default_ttl_secs() -> u64 {
    12 * 3600
}

/// Upstream weather API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Base URL of the timeline endpoint (the location is appended)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; falls back to the `WEATHER_API_KEY` environment variable
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maximum wait for one origin fetch, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl OriginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_base_url() -> String {
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline/"
        .to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ProxyConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let mut config: ProxyConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.apply_env_fallbacks(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT`, `REDIS_ADDR` and `REDIS_PASSWORD` where no prefixed
    /// variable set the same field.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if get(HTTP_ADDR_ENV).is_none() {
            if let Some(port) = get(PORT_ENV) {
                let port: u16 = port.trim().parse().map_err(|_| {
                    ProxyError::Config(format!("{} is not a valid port: {}", PORT_ENV, port))
                })?;
                self.server.http_addr.set_port(port);
            }
        }

        if get(REDIS_URL_ENV).is_none() {
            let addr = get(REDIS_ADDR_ENV);
            let password = get(REDIS_PASSWORD_ENV);
            if addr.is_some() || password.is_some() {
                let addr = addr.unwrap_or_else(|| DEFAULT_REDIS_ADDR.to_string());
                self.cache.redis_url = redis_url(addr.trim(), password.as_deref())?;
            }
        }
        Ok(())
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ProxyConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ProxyError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter, cache and origin cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.limit == 0 {
            return Err(ProxyError::Config("rate_limiting.limit must be positive".into()));
        }
        if self.rate_limiting.window_secs == 0 {
            return Err(ProxyError::Config("rate_limiting.window_secs must be positive".into()));
        }
        if self.rate_limiting.cleanup_interval_secs == Some(0) {
            return Err(ProxyError::Config(
                "rate_limiting.cleanup_interval_secs must be positive".into(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ProxyError::Config("cache.ttl_secs must be positive".into()));
        }
        if self.origin.timeout_ms == 0 {
            return Err(ProxyError::Config("origin.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// `host:port` plus optional password to a `redis://` URL.
fn redis_url(addr: &str, password: Option<&str>) -> Result<String> {
    let mut url = reqwest::Url::parse(&format!("redis://{}", addr)).map_err(|e| {
        ProxyError::Config(format!("{} is not a valid address: {}", REDIS_ADDR_ENV, e))
    })?;
    if let Some(password) = password {
        url.set_password(Some(password)).map_err(|_| {
            ProxyError::Config(format!("{} cannot carry a password", REDIS_ADDR_ENV))
        })?;
    }
    Ok(url.to_string())
}
