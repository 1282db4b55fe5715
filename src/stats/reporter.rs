//! Batched stats reporter
//!
//! Each worker keeps an in-memory map of execution deltas behind a narrow
//! mutex. A background ticker swaps the map out and flushes one update per
//! execution. Closing the reporter forces a final flush, so stats survive
//! task failures and shutdown.

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::counters::ExecutionCounters;
use crate::model::StatsDelta;
use crate::store::KvStore;

/// Destination for flushed deltas
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn flush(&self, execution_id: &str, delta: StatsDelta) -> anyhow::Result<()>;
}

/// POSTs one update per execution to the orchestrator
pub struct HttpStatsSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatsSink {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StatsSink for HttpStatsSink {
    async fn flush(&self, execution_id: &str, delta: StatsDelta) -> anyhow::Result<()> {
        let url = format!(
            "{}/executions/{execution_id}/stats",
            self.base_url.trim_end_matches('/')
        );
        let response = self.client.post(&url).json(&delta).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// Applies deltas straight into the shared counters
///
/// The alternative sink for deployments where the orchestrator polls the
/// kv-store instead of exposing an ingest endpoint.
pub struct KvStatsSink {
    counters: ExecutionCounters,
}

impl KvStatsSink {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { counters: ExecutionCounters::new(store) }
    }
}

#[async_trait]
impl StatsSink for KvStatsSink {
    async fn flush(&self, execution_id: &str, delta: StatsDelta) -> anyhow::Result<()> {
        self.counters.apply_delta(execution_id, delta).await?;
        Ok(())
    }
}

/// Reporter tuning
#[derive(Debug, Clone)]
pub struct StatsReporterConfig {
    pub flush_interval: Duration,
}

impl Default for StatsReporterConfig {
    fn default() -> Self {
        Self { flush_interval: Duration::from_secs(5) }
    }
}

/// Per-worker batched reporter
pub struct StatsReporter {
    pending: Arc<Mutex<HashMap<String, StatsDelta>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn StatsSink>,
}

impl StatsReporter {
    /// Start the reporter with its background ticker
    #[must_use]
    pub fn spawn(sink: Arc<dyn StatsSink>, config: StatsReporterConfig) -> Self {
        let pending: Arc<Mutex<HashMap<String, StatsDelta>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let ticker_pending = Arc::clone(&pending);
        let ticker_sink = Arc::clone(&sink);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                flush_pending(&ticker_pending, ticker_sink.as_ref()).await;
            }
        });

        Self { pending, ticker: Mutex::new(Some(ticker)), sink }
    }

    /// Merge a delta for an execution; flushed on the next tick
    pub fn record(&self, execution_id: &str, delta: StatsDelta) {
        if delta.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        pending
            .entry(execution_id.to_string())
            .or_default()
            .merge(delta);
    }

    /// Stop the ticker and force a final flush; idempotent
    pub async fn close(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        flush_pending(&self.pending, self.sink.as_ref()).await;
    }
}

/// Swap the map out under the lock, flush outside it
async fn flush_pending(
    pending: &Arc<Mutex<HashMap<String, StatsDelta>>>,
    sink: &dyn StatsSink,
) {
    let batch = {
        let mut pending = pending.lock();
        std::mem::take(&mut *pending)
    };
    for (execution_id, delta) in batch {
        if let Err(e) = sink.flush(&execution_id, delta).await {
            warn!("stats flush failed for execution {execution_id}: {e}");
        } else {
            debug!(
                "flushed stats for execution {execution_id}: {} tasks, {} items",
                delta.tasks_processed, delta.items_extracted
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn deltas_coalesce_between_ticks() {
        let store = Arc::new(MemoryKvStore::new());
        let sink = Arc::new(KvStatsSink::new(Arc::clone(&store) as Arc<dyn KvStore>));
        let reporter = StatsReporter::spawn(
            sink,
            StatsReporterConfig { flush_interval: Duration::from_millis(40) },
        );

        reporter.record("e1", StatsDelta { tasks_processed: 1, items_extracted: 2, urls_discovered: 0, errors: 0 });
        reporter.record("e1", StatsDelta { tasks_processed: 1, items_extracted: 1, urls_discovered: 3, errors: 0 });

        tokio::time::sleep(Duration::from_millis(120)).await;

        let counters = ExecutionCounters::new(store as Arc<dyn KvStore>);
        let totals = counters.totals("e1").await.expect("totals");
        assert_eq!(totals.tasks_processed, 2);
        assert_eq!(totals.items_extracted, 3);
        assert_eq!(totals.urls_discovered, 3);
        reporter.close().await;
    }

    #[tokio::test]
    async fn close_forces_final_flush() {
        let store = Arc::new(MemoryKvStore::new());
        let sink = Arc::new(KvStatsSink::new(Arc::clone(&store) as Arc<dyn KvStore>));
        let reporter = StatsReporter::spawn(
            sink,
            StatsReporterConfig { flush_interval: Duration::from_secs(3600) },
        );

        reporter.record("e1", StatsDelta { tasks_processed: 4, items_extracted: 0, urls_discovered: 0, errors: 1 });
        reporter.close().await;

        let counters = ExecutionCounters::new(store as Arc<dyn KvStore>);
        let totals = counters.totals("e1").await.expect("totals");
        assert_eq!(totals.tasks_processed, 4);
        assert_eq!(totals.errors, 1);
    }

    #[tokio::test]
    async fn http_sink_posts_per_execution() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/executions/e1/stats")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let sink = HttpStatsSink::new(server.url());
        sink.flush("e1", StatsDelta { tasks_processed: 1, items_extracted: 0, urls_discovered: 0, errors: 0 })
            .await
            .expect("flush");
        mock.assert_async().await;
    }
}
