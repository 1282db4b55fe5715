//! Lock-free counters for bus observability
//!
//! All counters use `Ordering::SeqCst` so snapshot reads stay coherent
//! across fields.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for task bus operations
#[derive(Debug, Clone, Default)]
pub struct BusMetrics {
    published: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    nacked: Arc<AtomicU64>,
    redelivered: Arc<AtomicU64>,
    dead_lettered: Arc<AtomicU64>,
}

impl BusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_published(&self) {
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_acked(&self) {
        self.acked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_nacked(&self) {
        self.nacked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_redelivered(&self) {
        self.redelivered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::SeqCst);
    }

    /// Coherent view across all counters
    #[must_use]
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            nacked: self.nacked.load(Ordering::SeqCst),
            redelivered: self.redelivered.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of the bus counters
#[derive(Debug, Clone, Copy)]
pub struct BusMetricsSnapshot {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
}

impl BusMetricsSnapshot {
    /// Messages published but not yet resolved either way
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.published
            .saturating_sub(self.acked)
            .saturating_sub(self.dead_lettered)
    }
}
