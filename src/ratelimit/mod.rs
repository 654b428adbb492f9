//! Per-client sliding window rate limiting.

mod limiter;
mod window;

pub use limiter::SlidingWindowLimiter;
pub use window::{LimiterConfig, WindowRecord};
