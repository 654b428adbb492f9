//! Weather payloads: the upstream timeline response and the body served to
//! clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timeline response from the Visual Crossing API.
///
/// Fields the proxy reads are typed; everything else is carried through
/// `extra` so clients see the full payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    #[serde(default)]
    pub resolved_address: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub days: Vec<Conditions>,
    pub current_conditions: Conditions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Conditions at one point in time (current) or for one day.
///
/// Upstream sends `null` for unavailable measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub datetime: String,
    pub temp: Option<f64>,
    pub feelslike: Option<f64>,
    pub humidity: Option<f64>,
    pub windspeed: Option<f64>,
    pub winddir: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub cloudcover: Option<f64>,
    pub precip: Option<f64>,
    pub precipprob: Option<f64>,
    pub snow: Option<f64>,
    pub snowdepth: Option<f64>,
    #[serde(default)]
    pub conditions: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response body of `GET /api/weather`: the upstream report as received,
/// plus whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherResponse {
    #[serde(flatten)]
    pub report: WeatherReport,
    pub cached: bool,
}

impl WeatherResponse {
    pub fn new(report: WeatherReport, cached: bool) -> Self {
        Self { report, cached }
    }
}
