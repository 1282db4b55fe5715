//! Worker runtime
//!
//! Wires the subscription, executor, stores and background services into
//! one process. A worker is stateless: everything it shares with the rest
//! of the fleet lives in the bus and the kv-store. Shutdown is graceful:
//! stop intake, drain in-flight handlers, flush stats and items, close
//! drivers.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bus::{SubscriberConfig, SubscriptionHandle, TaskBus, TaskSubscriber};
use crate::config::WorkerSettings;
use crate::driver::{DriverManager, DriverManagerConfig};
use crate::executor::{RetryPolicy, TaskExecutor, TaskExecutorConfig};
use crate::items::{ItemSink, ItemWriter, ItemWriterConfig, MemoryItemSink, PostgresItemSink};
use crate::nodes::NodeRegistry;
use crate::recovery::{
    IncidentReporter, KvIncidentStore, RecoveryConfig, RecoveryManager, RuleEngine,
};
use crate::stats::{
    ExecutionCounters, HttpStatsSink, KvStatsSink, StatsReporter, StatsReporterConfig, StatsSink,
};
use crate::store::{Deduplicator, KvStore, MemoryKvStore, RedisKvStore};

/// One worker process
pub struct Worker {
    bus_sub: Arc<dyn TaskSubscriber>,
    executor: Arc<TaskExecutor>,
    stats: Arc<StatsReporter>,
    items: Arc<ItemWriter>,
    drivers: Arc<DriverManager>,
    settings: WorkerSettings,
}

impl Worker {
    /// Assemble a worker from settings and a connected bus
    ///
    /// Fails fast on unreachable stores; the process should exit non-zero
    /// rather than consume tasks it cannot complete.
    pub async fn build(
        settings: WorkerSettings,
        bus_pub: Arc<dyn TaskBus>,
        bus_sub: Arc<dyn TaskSubscriber>,
    ) -> Result<Self> {
        let kv: Arc<dyn KvStore> = match settings.redis_url() {
            Some(url) => Arc::new(
                RedisKvStore::connect(url)
                    .await
                    .context("kv-store connect failed")?,
            ),
            None => Arc::new(MemoryKvStore::new()),
        };
        Self::build_with_kv(settings, bus_pub, bus_sub, kv).await
    }

    /// Assemble a worker over an existing kv-store
    ///
    /// Single-process deployments share one in-memory store between the
    /// worker and the orchestrator; a store built here instead would split
    /// the dedup sets and counters in two.
    pub async fn build_with_kv(
        settings: WorkerSettings,
        bus_pub: Arc<dyn TaskBus>,
        bus_sub: Arc<dyn TaskSubscriber>,
        kv: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let item_sink: Arc<dyn ItemSink> = match settings.database_url() {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(4)
                    .connect(url)
                    .await
                    .context("item store connect failed")?;
                Arc::new(PostgresItemSink::new(pool))
            }
            None => Arc::new(MemoryItemSink::new()),
        };

        let stats_sink: Arc<dyn StatsSink> = match settings.stats_endpoint() {
            Some(endpoint) => Arc::new(HttpStatsSink::new(endpoint)),
            None => Arc::new(KvStatsSink::new(Arc::clone(&kv))),
        };

        let drivers = Arc::new(DriverManager::new(DriverManagerConfig {
            default_driver: settings.default_driver(),
            cdp_endpoint: settings.cdp_endpoint().map(str::to_string),
            ..DriverManagerConfig::default()
        }));

        let recovery = Arc::new(RecoveryManager::new(
            Arc::clone(&kv),
            RuleEngine::with_defaults(),
            IncidentReporter::new(Arc::new(KvIncidentStore::new(Arc::clone(&kv)))),
            RecoveryConfig {
                max_retries: settings.max_retries(),
                ..RecoveryConfig::default()
            },
        ));

        let stats = Arc::new(StatsReporter::spawn(
            stats_sink,
            StatsReporterConfig { flush_interval: settings.stats_flush_interval() },
        ));
        let items = Arc::new(ItemWriter::spawn(
            item_sink,
            ItemWriterConfig {
                batch_size: settings.item_batch_size(),
                flush_interval: settings.item_flush_interval(),
                ..ItemWriterConfig::default()
            },
        ));

        let executor = Arc::new(TaskExecutor::new(
            NodeRegistry::with_builtins(),
            Arc::clone(&drivers),
            bus_pub,
            Arc::new(Deduplicator::new(Arc::clone(&kv))),
            Arc::clone(&items),
            Arc::clone(&stats),
            recovery,
            Arc::new(ExecutionCounters::new(Arc::clone(&kv))),
            kv,
            TaskExecutorConfig {
                retry_policy: RetryPolicy::default(),
                task_timeout: settings.task_timeout(),
                ..TaskExecutorConfig::default()
            },
        ));

        Ok(Self {
            bus_sub,
            executor,
            stats,
            items,
            drivers,
            settings,
        })
    }

    /// Subscribe and run until a termination signal arrives
    pub async fn run(self) -> Result<()> {
        let subscription = self
            .bus_sub
            .subscribe(
                SubscriberConfig {
                    max_outstanding: self.settings.max_outstanding(),
                    parallelism: self.settings.parallelism(),
                    ack_deadline: self.settings.ack_deadline(),
                },
                Arc::clone(&self.executor) as Arc<dyn crate::bus::TaskHandler>,
            )
            .await
            .context("subscription failed")?;

        // idle pooled browsers get reaped in the background
        let reaper_drivers = Arc::clone(&self.drivers);
        let reaper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                reaper_drivers.reap_idle().await;
            }
        });

        info!(
            parallelism = self.settings.parallelism(),
            driver = self.settings.default_driver().as_str(),
            "worker running"
        );
        wait_for_termination().await;
        info!("termination signal received, shutting down");

        reaper.abort();
        self.shutdown(subscription).await;
        Ok(())
    }

    /// Graceful shutdown: stop intake, drain, flush, close
    pub async fn shutdown(&self, subscription: SubscriptionHandle) {
        self.bus_sub.stop_intake();
        subscription.join().await;
        self.stats.close().await;
        self.items.close().await;
        self.drivers.close_all().await;
        info!("worker shutdown complete");
    }
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("sigterm handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
