//! Per-client sliding window state.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{ProxyError, Result};

/// Limit and window length for a sliding window limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    limit: u32,
    window: Duration,
    cleanup_interval: Option<Duration>,
}

impl LimiterConfig {
    /// Create a configuration admitting `limit` events per trailing `window`.
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(ProxyError::Config("limit must be positive".into()));
        }
        if window.is_zero() {
            return Err(ProxyError::Config("window must be positive".into()));
        }
        Ok(Self {
            limit,
            window,
            cleanup_interval: None,
        })
    }

    /// Override how often the background task prunes idle clients.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(ProxyError::Config("cleanup interval must be positive".into()));
        }
        self.cleanup_interval = Some(interval);
        Ok(self)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Cleanup interval, defaulting to the window length.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval.unwrap_or(self.window)
    }
}

/// Admission instants of one client, oldest first.
///
/// An instant is live while `now - t < window`; one exactly `window` old
/// has expired.
#[derive(Debug, Default, Clone)]
pub struct WindowRecord {
    admitted: VecDeque<Instant>,
}

impl WindowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired instants from the front. Returns how many were removed.
    pub fn prune(&mut self, now: Instant, window: Duration) -> usize {
        let mut removed = 0;
        while let Some(&oldest) = self.admitted.front() {
            if is_expired(oldest, now, window) {
                self.admitted.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Prune, then record `now` if fewer than `limit` instants remain.
    ///
    /// A denial leaves the record untouched apart from pruning.
    pub fn try_admit(&mut self, now: Instant, limit: u32, window: Duration) -> bool {
        self.prune(now, window);
        if self.admitted.len() < limit as usize {
            self.admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of instants still inside the window, without mutating.
    pub fn live_count(&self, now: Instant, window: Duration) -> usize {
        self.admitted
            .iter()
            .filter(|&&t| !is_expired(t, now, window))
            .count()
    }

    /// Oldest instant still inside the window.
    pub fn oldest_live(&self, now: Instant, window: Duration) -> Option<Instant> {
        self.admitted
            .iter()
            .copied()
            .find(|&t| !is_expired(t, now, window))
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

fn is_expired(t: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(t) >= window
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[test]
    fn test_config_rejects_zero_values() {
        assert!(LimiterConfig::new(0, WINDOW).is_err());
        assert!(LimiterConfig::new(1, Duration::ZERO).is_err());
        assert!(LimiterConfig::new(1, WINDOW)
            .unwrap()
            .with_cleanup_interval(Duration::ZERO)
            .is_err());
    }

    #[test]
    fn test_cleanup_interval_defaults_to_window() {
        let config = LimiterConfig::new(5, WINDOW).unwrap();
        assert_eq!(config.cleanup_interval(), WINDOW);

        let config = config.with_cleanup_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(config.cleanup_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_admit_until_full() {
        let start = Instant::now();
        let mut record = WindowRecord::new();

        assert!(record.try_admit(start, 2, WINDOW));
        assert!(record.try_admit(start + Duration::from_millis(10), 2, WINDOW));
        assert!(!record.try_admit(start + Duration::from_millis(20), 2, WINDOW));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_exactly_window_old_is_expired() {
        let start = Instant::now();
        let mut record = WindowRecord::new();
        record.try_admit(start, 1, WINDOW);

        let almost = start + WINDOW - Duration::from_nanos(1);
        assert_eq!(record.live_count(almost, WINDOW), 1);
        assert!(!record.try_admit(almost, 1, WINDOW));

        assert_eq!(record.live_count(start + WINDOW, WINDOW), 0);
        assert!(record.try_admit(start + WINDOW, 1, WINDOW));
    }

    #[test]
    fn test_prune_only_touches_prefix() {
        let start = Instant::now();
        let mut record = WindowRecord::new();
        for offset in [0u64, 100, 900] {
            record.try_admit(start + Duration::from_millis(offset), 10, WINDOW);
        }

        let removed = record.prune(start + Duration::from_millis(1050), WINDOW);
        assert_eq!(removed, 1);
        assert_eq!(record.len(), 2);
        assert_eq!(
            record.oldest_live(start + Duration::from_millis(1050), WINDOW),
            Some(start + Duration::from_millis(100))
        );

        record.prune(start + Duration::from_secs(5), WINDOW);
        assert!(record.is_empty());
    }
}
