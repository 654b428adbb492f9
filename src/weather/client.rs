//! Visual Crossing timeline API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, info};

use super::models::WeatherReport;
use crate::cache::CacheKey;
use crate::config::OriginConfig;
use crate::error::OriginError;
use crate::fetch::{Origin, ResourceParams};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "WEATHER_API_KEY";

pub const PARAM_CITY: &str = "city";
pub const PARAM_UNITS: &str = "units";

/// Unit systems accepted in the `units` parameter.
pub const UNITS_METRIC: &str = "metric";
pub const UNITS_IMPERIAL: &str = "imperial";

/// Origin fetching weather reports from Visual Crossing.
#[derive(Debug, Clone)]
pub struct VisualCrossingOrigin {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl VisualCrossingOrigin {
    /// Build a client from configuration, reading the key from the
    /// environment if the configuration has none.
    pub fn new(config: &OriginConfig) -> Result<Self, OriginError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    /// Build a client with an explicit key.
    pub fn with_api_key(
        config: &OriginConfig,
        api_key: Option<String>,
    ) -> Result<Self, OriginError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| OriginError::InvalidRequest(format!("invalid base URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| OriginError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            timeout: config.timeout(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Timeline URL for a city, e.g.
    /// `.../timeline/New%20York?unitGroup=us&key=...&contentType=json`.
    pub fn request_url(&self, params: &ResourceParams) -> Result<Url, OriginError> {
        let api_key = self.api_key.as_deref().ok_or(OriginError::MissingApiKey)?;
        let city = params
            .get(PARAM_CITY)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OriginError::InvalidRequest("city parameter is required".into()))?;

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OriginError::InvalidRequest("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(city);
        url.query_pairs_mut()
            .append_pair("unitGroup", unit_group(params))
            .append_pair("key", api_key)
            .append_pair("contentType", "json");
        Ok(url)
    }
}

/// Visual Crossing calls imperial units "us".
fn unit_group(params: &ResourceParams) -> &'static str {
    match params.get(PARAM_UNITS).map(String::as_str) {
        Some(UNITS_IMPERIAL) => "us",
        _ => "metric",
    }
}

#[async_trait]
impl Origin for VisualCrossingOrigin {
    type Value = WeatherReport;

    fn namespace(&self) -> &str {
        "weather"
    }

    /// `weather:{city}:{units}`, units defaulting to metric.
    fn cache_key(&self, params: &ResourceParams) -> CacheKey {
        let city = params.get(PARAM_CITY).map(String::as_str).unwrap_or_default();
        let units = params
            .get(PARAM_UNITS)
            .map(String::as_str)
            .unwrap_or(UNITS_METRIC);
        CacheKey::from_segments(self.namespace(), &[city, units])
    }

    async fn fetch(&self, params: &ResourceParams) -> Result<WeatherReport, OriginError> {
        let url = self.request_url(params)?;
        debug!(city = ?params.get(PARAM_CITY), "Requesting weather from origin");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                OriginError::Timeout(self.timeout)
            } else {
                OriginError::Transport(e.without_url().to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OriginError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| OriginError::Transport(e.without_url().to_string()))?;
        let report: WeatherReport =
            serde_json::from_slice(&bytes).map_err(|e| OriginError::Malformed(e.to_string()))?;

        info!(
            city = ?params.get(PARAM_CITY),
            resolved = %report.resolved_address,
            "Fetched weather data from origin"
        );
        Ok(report)
    }
}
