//! Configuration types
//!
//! Fields are crate-private; construction goes through the builders so
//! every config in the system has passed validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::DriverKind;

/// Worker process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Redis URL for the shared kv-store; in-memory when unset
    pub(crate) redis_url: Option<String>,
    /// Postgres URL for the item sink; in-memory when unset
    pub(crate) database_url: Option<String>,
    /// Orchestrator stats endpoint; counters go through the kv-store when
    /// unset
    pub(crate) stats_endpoint: Option<String>,
    pub(crate) bus_capacity: usize,
    pub(crate) max_outstanding: usize,
    pub(crate) parallelism: usize,
    pub(crate) ack_deadline_secs: u64,
    pub(crate) default_driver: DriverKind,
    pub(crate) cdp_endpoint: Option<String>,
    pub(crate) stats_flush_secs: u64,
    pub(crate) item_batch_size: usize,
    pub(crate) item_flush_secs: u64,
    pub(crate) max_retries: u32,
    pub(crate) task_timeout_secs: u64,
}

impl WorkerSettings {
    #[must_use]
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    #[must_use]
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    #[must_use]
    pub fn stats_endpoint(&self) -> Option<&str> {
        self.stats_endpoint.as_deref()
    }

    #[must_use]
    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity
    }

    #[must_use]
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    #[must_use]
    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline_secs)
    }

    #[must_use]
    pub fn default_driver(&self) -> DriverKind {
        self.default_driver
    }

    #[must_use]
    pub fn cdp_endpoint(&self) -> Option<&str> {
        self.cdp_endpoint.as_deref()
    }

    #[must_use]
    pub fn stats_flush_interval(&self) -> Duration {
        Duration::from_secs(self.stats_flush_secs)
    }

    #[must_use]
    pub fn item_batch_size(&self) -> usize {
        self.item_batch_size
    }

    #[must_use]
    pub fn item_flush_interval(&self) -> Duration {
        Duration::from_secs(self.item_flush_secs)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Orchestrator process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub(crate) redis_url: Option<String>,
    pub(crate) bus_capacity: usize,
    pub(crate) poll_interval_secs: u64,
    pub(crate) quiescence_ticks: u32,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    #[must_use]
    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn quiescence_ticks(&self) -> u32 {
        self.quiescence_ticks
    }
}
