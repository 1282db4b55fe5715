//! Sliding-window failure tracker
//!
//! Per-domain circular buffer of recent outcomes in the shared kv-store.
//! Recovery triggers iff the window's error rate exceeds the threshold OR
//! the tail holds enough consecutive failures. Thresholds are
//! hot-reloadable.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::store::{KvStore, StoreError};

/// Tunable thresholds, reloadable at runtime from a config store
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub window_size: usize,
    /// Error rate over the window that triggers recovery (0.0..=1.0)
    pub error_rate_threshold: f64,
    /// Consecutive tail failures that trigger recovery regardless of rate
    pub consecutive_threshold: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            error_rate_threshold: 0.1,
            consecutive_threshold: 3,
        }
    }
}

const WINDOW_TTL: Duration = Duration::from_secs(60 * 60);

/// Shared per-domain outcome window
pub struct SlidingWindowTracker {
    store: Arc<dyn KvStore>,
    config: RwLock<TrackerConfig>,
}

impl SlidingWindowTracker {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, config: RwLock::new(TrackerConfig::default()) }
    }

    #[must_use]
    pub fn with_config(store: Arc<dyn KvStore>, config: TrackerConfig) -> Self {
        Self { store, config: RwLock::new(config) }
    }

    /// Swap in new thresholds; in-flight decisions use the old ones
    pub fn update_config(&self, config: TrackerConfig) {
        *self.config.write() = config;
    }

    #[must_use]
    pub fn config(&self) -> TrackerConfig {
        *self.config.read()
    }

    /// Load thresholds from the config store key, when present
    pub async fn reload_from_store(&self, key: &str) -> Result<(), StoreError> {
        if let Some(raw) = self.store.get(key).await? {
            let config: TrackerConfig =
                serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(key, e))?;
            self.update_config(config);
        }
        Ok(())
    }

    fn key(domain: &str) -> String {
        format!("recovery:window:{domain}")
    }

    /// Record an outcome for the domain
    pub async fn record(&self, domain: &str, success: bool) -> Result<(), StoreError> {
        let window_size = self.config.read().window_size;
        self.store
            .list_push(
                &Self::key(domain),
                if success { "1" } else { "0" },
                Some(window_size),
                Some(WINDOW_TTL),
            )
            .await
    }

    /// Whether the domain's recent history warrants a recovery plan
    pub async fn should_trigger(&self, domain: &str) -> Result<bool, StoreError> {
        let config = *self.config.read();
        let window = self.store.list_range(&Self::key(domain)).await?;
        if window.is_empty() {
            return Ok(false);
        }

        // the rate denominator is the full window size, so a thin history
        // cannot trip the threshold off a single failure; the consecutive
        // check below covers young domains
        let failures = window.iter().filter(|o| o.as_str() == "0").count();
        let error_rate = failures as f64 / config.window_size.max(1) as f64;
        if error_rate > config.error_rate_threshold {
            return Ok(true);
        }

        let consecutive_tail = window
            .iter()
            .rev()
            .take_while(|o| o.as_str() == "0")
            .count();
        Ok(consecutive_tail >= config.consecutive_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn tracker() -> SlidingWindowTracker {
        SlidingWindowTracker::with_config(
            Arc::new(MemoryKvStore::new()),
            TrackerConfig {
                window_size: 10,
                error_rate_threshold: 0.3,
                consecutive_threshold: 3,
            },
        )
    }

    #[tokio::test]
    async fn empty_window_never_triggers() {
        let t = tracker();
        assert!(!t.should_trigger("quiet.example").await.expect("check"));
    }

    #[tokio::test]
    async fn error_rate_over_threshold_triggers() {
        let t = tracker();
        // 4 failures / 10 = 40% > 30%
        for i in 0..10 {
            t.record("busy.example", i % 3 != 0).await.expect("record");
        }
        assert!(t.should_trigger("busy.example").await.expect("check"));
    }

    #[tokio::test]
    async fn consecutive_tail_triggers_despite_low_rate() {
        let t = SlidingWindowTracker::with_config(
            Arc::new(MemoryKvStore::new()),
            TrackerConfig {
                window_size: 100,
                error_rate_threshold: 0.5,
                consecutive_threshold: 3,
            },
        );
        // 3/53 is far below the 50% rate threshold, but the tail is solid
        for _ in 0..50 {
            t.record("tail.example", true).await.expect("record");
        }
        for _ in 0..3 {
            t.record("tail.example", false).await.expect("record");
        }
        assert!(t.should_trigger("tail.example").await.expect("check"));
    }

    #[tokio::test]
    async fn success_breaks_the_consecutive_tail() {
        let t = SlidingWindowTracker::with_config(
            Arc::new(MemoryKvStore::new()),
            TrackerConfig {
                window_size: 10,
                error_rate_threshold: 0.9,
                consecutive_threshold: 3,
            },
        );
        t.record("ok.example", false).await.expect("record");
        t.record("ok.example", false).await.expect("record");
        t.record("ok.example", true).await.expect("record");
        t.record("ok.example", false).await.expect("record");
        assert!(!t.should_trigger("ok.example").await.expect("check"));
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let t = tracker();
        // 10 old failures pushed out by 10 successes
        for _ in 0..10 {
            t.record("w.example", false).await.expect("record");
        }
        for _ in 0..10 {
            t.record("w.example", true).await.expect("record");
        }
        assert!(!t.should_trigger("w.example").await.expect("check"));
    }

    #[tokio::test]
    async fn config_hot_reload_applies() {
        let t = tracker();
        for _ in 0..2 {
            t.record("r.example", false).await.expect("record");
        }
        assert!(!t.should_trigger("r.example").await.expect("check"));

        t.update_config(TrackerConfig {
            window_size: 10,
            error_rate_threshold: 0.3,
            consecutive_threshold: 2,
        });
        assert!(t.should_trigger("r.example").await.expect("check"));
    }
}
