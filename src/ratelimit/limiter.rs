//! Sliding window rate limiter.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::window::{LimiterConfig, WindowRecord};

/// Per-client admission control over a trailing time window.
///
/// Records live in a `DashMap`, so each client's record is guarded by the
/// lock of the shard it hashes to: calls for one client are serialized,
/// calls for clients in other shards run in parallel. Guards are never held
/// across an `.await`.
///
/// Constructing the limiter inside a Tokio runtime starts a cleanup task that
/// prunes idle clients every `cleanup_interval`. The task stops when the
/// limiter is dropped or [`shutdown`](Self::shutdown) is called.
pub struct SlidingWindowLimiter {
    state: Arc<LimiterState>,
    cleanup: Option<JoinHandle<()>>,
}

struct LimiterState {
    config: LimiterConfig,
    records: DashMap<String, WindowRecord>,
}

impl LimiterState {
    /// Prune every record and drop the empty ones. Returns clients removed.
    fn prune_all(&self, now: Instant) -> usize {
        let window = self.config.window();
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.prune(now, window);
            !record.is_empty()
        });
        before.saturating_sub(self.records.len())
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter and start its background cleanup task.
    pub fn new(config: LimiterConfig) -> Self {
        let state = Arc::new(LimiterState {
            config,
            records: DashMap::new(),
        });
        let cleanup = spawn_cleanup(Arc::downgrade(&state), config.cleanup_interval());

        debug!(
            limit = config.limit(),
            window = ?config.window(),
            cleanup_interval = ?config.cleanup_interval(),
            background_cleanup = cleanup.is_some(),
            "Sliding window limiter created"
        );

        Self { state, cleanup }
    }

    /// Decide whether `client` may proceed, consuming a slot if so.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let limit = self.state.config.limit();
        let window = self.state.config.window();

        let admitted = match self.state.records.get_mut(client) {
            Some(mut record) => record.try_admit(now, limit, window),
            None => self
                .state
                .records
                .entry(client.to_owned())
                .or_default()
                .try_admit(now, limit, window),
        };

        if admitted {
            trace!(client = %client, "Admitted");
        } else {
            debug!(client = %client, limit = limit, "Rate limit exceeded");
        }
        admitted
    }

    /// Slots left for `client` in the current window.
    pub fn remaining(&self, client: &str) -> u32 {
        let now = Instant::now();
        let used = self
            .state
            .records
            .get(client)
            .map(|record| record.live_count(now, self.state.config.window()))
            .unwrap_or(0);
        self.state.config.limit().saturating_sub(used as u32)
    }

    /// How long until `client` gets a slot back, or `None` if one is free now.
    pub fn retry_after(&self, client: &str) -> Option<Duration> {
        let now = Instant::now();
        let window = self.state.config.window();
        let record = self.state.records.get(client)?;

        if record.live_count(now, window) < self.state.config.limit() as usize {
            return None;
        }
        let oldest = record.oldest_live(now, window)?;
        Some(window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    /// Run one cleanup pass now. Returns the number of clients removed.
    pub fn cleanup(&self) -> usize {
        self.state.prune_all(Instant::now())
    }

    /// Number of clients with a record.
    pub fn tracked_clients(&self) -> usize {
        self.state.records.len()
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.state.config
    }

    /// Stop the background cleanup task. Lazy pruning in `allow` continues.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
            debug!("Limiter cleanup task stopped");
        }
    }
}

impl Drop for SlidingWindowLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_cleanup(state: Weak<LimiterState>, period: Duration) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No Tokio runtime; limiter records are only pruned on access");
        return None;
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else {
                break;
            };
            let removed = state.prune_all(Instant::now());
            if removed > 0 {
                debug!(
                    removed = removed,
                    tracked = state.records.len(),
                    "Pruned idle rate limit records"
                );
            }
        }
    }))
}
