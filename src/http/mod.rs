//! HTTP transport for the weather API.
//!
//! Maps resolve outcomes to status codes: denied requests get `429`, origin
//! failures `502`/`504`, invalid queries `400`.

mod handlers;
mod server;

pub use handlers::{client_key, get_weather, health_check, router, AppState, WeatherQuery};
pub use server::HttpServer;
