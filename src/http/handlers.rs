//! HTTP handlers mapping resolve outcomes to responses.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::OriginError;
use crate::fetch::{FetchCoordinator, Origin, Resolution, ResourceParams};
use crate::weather::{
    WeatherReport, WeatherResponse, PARAM_CITY, PARAM_UNITS, UNITS_IMPERIAL, UNITS_METRIC,
};

/// Shared state for the HTTP handlers.
pub struct AppState<O: Origin> {
    pub coordinator: Arc<FetchCoordinator<O>>,
    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_headers: bool,
}

impl<O: Origin> Clone for AppState<O> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            trust_forwarded_headers: self.trust_forwarded_headers,
        }
    }
}

impl<O: Origin> AppState<O> {
    /// State that identifies clients by their peer address only.
    pub fn new(coordinator: Arc<FetchCoordinator<O>>) -> Self {
        Self {
            coordinator,
            trust_forwarded_headers: false,
        }
    }

    /// Honour forwarding headers; only safe behind a proxy that sets them.
    pub fn with_trusted_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }
}

/// Build the API router.
pub fn router<O>(state: AppState<O>) -> Router
where
    O: Origin<Value = WeatherReport> + 'static,
{
    Router::new()
        .route("/api/weather", get(get_weather::<O>))
        .route("/api/health", get(health_check::<O>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub city: Option<String>,
    pub units: Option<String>,
}

/// `GET /api/weather?city=<city>&units=<metric|imperial>`
pub async fn get_weather<O>(
    State(state): State<AppState<O>>,
    Query(query): Query<WeatherQuery>,
    request: Request,
) -> Response
where
    O: Origin<Value = WeatherReport> + 'static,
{
    let Some(city) = query.city.filter(|c| !c.trim().is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            json!({ "error": "City parameter is required" }),
        );
    };

    let units = query
        .units
        .map(|u| u.trim().to_lowercase())
        .unwrap_or_else(|| UNITS_METRIC.to_string());
    if units != UNITS_METRIC && units != UNITS_IMPERIAL {
        return error_response(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Units must be metric or imperial" }),
        );
    }

    let client = client_key(
        request.headers(),
        connect_addr(&request),
        state.trust_forwarded_headers,
    );
    let mut params = ResourceParams::new();
    params.insert(PARAM_CITY.to_string(), city);
    params.insert(PARAM_UNITS.to_string(), units);

    match state.coordinator.resolve(&client, &params).await {
        Ok(Resolution::CacheHit(report)) => {
            Json(WeatherResponse::new(report, true)).into_response()
        }
        Ok(Resolution::OriginFetched(report)) => {
            Json(WeatherResponse::new(report, false)).into_response()
        }
        Ok(Resolution::AdmissionDenied) => rate_limited(&state, &client),
        Err(e) => origin_failure(e),
    }
}

/// `GET /api/health`
pub async fn health_check<O>(State(state): State<AppState<O>>) -> Json<serde_json::Value>
where
    O: Origin + 'static,
{
    let store = state.coordinator.store();
    Json(json!({
        "status": "healthy",
        "message": "Weather API is running",
        "cache": store.backend_name(),
        "cacheStats": store.stats(),
        "trackedClients": state.coordinator.limiter().tracked_clients(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn rate_limited<O: Origin + 'static>(state: &AppState<O>, client: &str) -> Response {
    let limiter = state.coordinator.limiter();
    let config = limiter.config();
    let retry_after = limiter.retry_after(client).unwrap_or(config.window());

    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        json!({
            "error": "Too many requests",
            "message": "Rate limit exceeded. Try again later.",
            "limit": format!(
                "{} requests per {}",
                config.limit(),
                describe_window(config.window())
            ),
        }),
    );
    if let Ok(value) = HeaderValue::from_str(&ceil_secs(retry_after).to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn origin_failure(error: OriginError) -> Response {
    let status = match error {
        OriginError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        OriginError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    warn!(status = status.as_u16(), error = %error, "Weather request failed");
    error_response(
        status,
        json!({
            "error": "Failed to fetch weather data",
            "details": error.to_string(),
        }),
    )
}

fn error_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn connect_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

/// Identify the caller.
///
/// With `trust_forwarded` set, the first `X-Forwarded-For` hop that parses as
/// an IP wins, then `X-Real-IP`. Otherwise, or when no header holds a valid
/// address, the peer IP is used. Unparseable header values are ignored so
/// they cannot mint fresh limiter keys.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').find_map(|hop| hop.trim().parse::<IpAddr>().ok()))
    };

    let forwarded = if trust_forwarded {
        from_header("x-forwarded-for").or_else(|| from_header("x-real-ip"))
    } else {
        None
    };

    let key = forwarded
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    debug!(client = %key, "Resolved client key");
    key
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn describe_window(window: Duration) -> String {
    match window.as_secs() {
        0 => format!("{} ms", window.as_millis()),
        3600 => "hour".to_string(),
        60 => "minute".to_string(),
        1 => "second".to_string(),
        secs if secs % 3600 == 0 => format!("{} hours", secs / 3600),
        secs if secs % 60 == 0 => format!("{} minutes", secs / 60),
        _ => format!("{:?}", window),
    }
}
