//! Weather origin: the Visual Crossing client and its payload types.

mod client;
mod models;

pub use client::{
    VisualCrossingOrigin, API_KEY_ENV, PARAM_CITY, PARAM_UNITS, UNITS_IMPERIAL, UNITS_METRIC,
};
pub use models::{Conditions, WeatherReport, WeatherResponse};

#[cfg(test)]
pub(crate) use models::tests::SAMPLE as SAMPLE_REPORT_JSON;
