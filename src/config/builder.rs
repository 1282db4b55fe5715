//! Settings builders with environment loading

use anyhow::{Result, bail};

use super::types::{OrchestratorSettings, WorkerSettings};
use crate::model::DriverKind;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Builder for [`WorkerSettings`]
#[derive(Debug, Clone)]
pub struct WorkerSettingsBuilder {
    settings: WorkerSettings,
}

impl Default for WorkerSettingsBuilder {
    fn default() -> Self {
        Self {
            settings: WorkerSettings {
                redis_url: None,
                database_url: None,
                stats_endpoint: None,
                bus_capacity: 10_000,
                max_outstanding: 64.max(num_cpus::get() * 2),
                parallelism: num_cpus::get().max(2),
                ack_deadline_secs: 300,
                default_driver: DriverKind::Http,
                cdp_endpoint: None,
                stats_flush_secs: 5,
                item_batch_size: 100,
                item_flush_secs: 5,
                max_retries: 3,
                task_timeout_secs: 280,
            },
        }
    }
}

impl WorkerSettingsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `CRAWLIFY_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        let s = &mut builder.settings;

        s.redis_url = env_var("CRAWLIFY_REDIS_URL");
        s.database_url = env_var("CRAWLIFY_DATABASE_URL");
        s.stats_endpoint = env_var("CRAWLIFY_STATS_ENDPOINT");
        s.cdp_endpoint = env_var("CRAWLIFY_CDP_ENDPOINT");
        s.bus_capacity = env_parse("CRAWLIFY_BUS_CAPACITY", s.bus_capacity);
        s.max_outstanding = env_parse("CRAWLIFY_MAX_OUTSTANDING", s.max_outstanding);
        s.parallelism = env_parse("CRAWLIFY_PARALLELISM", s.parallelism);
        s.ack_deadline_secs = env_parse("CRAWLIFY_ACK_DEADLINE_SECS", s.ack_deadline_secs);
        s.stats_flush_secs = env_parse("CRAWLIFY_STATS_FLUSH_SECS", s.stats_flush_secs);
        s.item_batch_size = env_parse("CRAWLIFY_ITEM_BATCH_SIZE", s.item_batch_size);
        s.item_flush_secs = env_parse("CRAWLIFY_ITEM_FLUSH_SECS", s.item_flush_secs);
        s.max_retries = env_parse("CRAWLIFY_MAX_RETRIES", s.max_retries);
        s.task_timeout_secs = env_parse("CRAWLIFY_TASK_TIMEOUT_SECS", s.task_timeout_secs);
        if let Some(driver) = env_var("CRAWLIFY_DEFAULT_DRIVER")
            && let Some(kind) = DriverKind::parse(&driver)
        {
            s.default_driver = kind;
        }

        builder
    }

    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.settings.redis_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.settings.database_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn default_driver(mut self, kind: DriverKind) -> Self {
        self.settings.default_driver = kind;
        self
    }

    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.settings.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn ack_deadline_secs(mut self, secs: u64) -> Self {
        self.settings.ack_deadline_secs = secs;
        self
    }

    /// Validate and produce the settings
    pub fn build(self) -> Result<WorkerSettings> {
        let s = self.settings;
        if s.parallelism == 0 {
            bail!("parallelism must be at least 1");
        }
        if s.max_outstanding < s.parallelism {
            bail!(
                "max_outstanding ({}) must cover parallelism ({})",
                s.max_outstanding,
                s.parallelism
            );
        }
        if s.task_timeout_secs >= s.ack_deadline_secs {
            bail!(
                "task timeout ({}s) must stay below the ack deadline ({}s)",
                s.task_timeout_secs,
                s.ack_deadline_secs
            );
        }
        if s.default_driver == crate::model::DriverKind::Cdp && s.cdp_endpoint.is_none() {
            bail!("cdp default driver requires CRAWLIFY_CDP_ENDPOINT");
        }
        Ok(s)
    }
}

/// Builder for [`OrchestratorSettings`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettingsBuilder {
    settings: OrchestratorSettings,
}

impl Default for OrchestratorSettingsBuilder {
    fn default() -> Self {
        Self {
            settings: OrchestratorSettings {
                redis_url: None,
                bus_capacity: 10_000,
                poll_interval_secs: 10,
                quiescence_ticks: 2,
            },
        }
    }
}

impl OrchestratorSettingsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `CRAWLIFY_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        let s = &mut builder.settings;
        s.redis_url = env_var("CRAWLIFY_REDIS_URL");
        s.bus_capacity = env_parse("CRAWLIFY_BUS_CAPACITY", s.bus_capacity);
        s.poll_interval_secs = env_parse("CRAWLIFY_POLL_INTERVAL_SECS", s.poll_interval_secs);
        s.quiescence_ticks = env_parse("CRAWLIFY_QUIESCENCE_TICKS", s.quiescence_ticks);
        builder
    }

    pub fn build(self) -> Result<OrchestratorSettings> {
        let s = self.settings;
        if s.quiescence_ticks == 0 {
            bail!("quiescence_ticks must be at least 1");
        }
        Ok(s)
    }
}
