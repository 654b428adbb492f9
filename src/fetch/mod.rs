//! Request resolution: admission, cache-aside lookup, origin fallback.

mod coordinator;
mod origin;

pub use coordinator::{CoordinatorOptions, FetchCoordinator, Resolution};
pub use origin::{Origin, ResourceParams};
