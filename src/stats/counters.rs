//! Shared per-execution counters
//!
//! Counters live in the kv-store and are only ever updated with additive
//! deltas, so workers report without coordination and the orchestrator
//! reads eventually-consistent totals.

use std::sync::Arc;

use crate::model::StatsDelta;
use crate::store::{KvStore, StoreError};

/// Reader/writer for an execution's shared counters
pub struct ExecutionCounters {
    store: Arc<dyn KvStore>,
}

/// Totals as read back from the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionTotals {
    pub tasks_published: u64,
    pub tasks_processed: u64,
    pub items_extracted: u64,
    pub urls_discovered: u64,
    pub errors: u64,
}

impl ExecutionTotals {
    /// Tasks published but not yet processed
    #[must_use]
    pub fn inflight(&self) -> u64 {
        self.tasks_published.saturating_sub(self.tasks_processed)
    }
}

impl ExecutionCounters {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(execution_id: &str, field: &str) -> String {
        format!("stats:{execution_id}:{field}")
    }

    /// Count tasks entering the bus for this execution
    pub async fn incr_published(&self, execution_id: &str, count: u64) -> Result<(), StoreError> {
        if count > 0 {
            self.store
                .incr_by(&Self::key(execution_id, "tasks_published"), count as i64)
                .await?;
        }
        Ok(())
    }

    /// Apply a worker's aggregated delta
    pub async fn apply_delta(
        &self,
        execution_id: &str,
        delta: StatsDelta,
    ) -> Result<(), StoreError> {
        let updates = [
            ("tasks_processed", delta.tasks_processed),
            ("items_extracted", delta.items_extracted),
            ("urls_discovered", delta.urls_discovered),
            ("errors", delta.errors),
        ];
        for (field, value) in updates {
            if value > 0 {
                self.store
                    .incr_by(&Self::key(execution_id, field), value as i64)
                    .await?;
            }
        }
        Ok(())
    }

    /// Current totals for an execution
    pub async fn totals(&self, execution_id: &str) -> Result<ExecutionTotals, StoreError> {
        let read = |field: &'static str| {
            let key = Self::key(execution_id, field);
            let store = Arc::clone(&self.store);
            async move {
                let raw = store.get(&key).await?;
                Ok::<u64, StoreError>(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
            }
        };

        Ok(ExecutionTotals {
            tasks_published: read("tasks_published").await?,
            tasks_processed: read("tasks_processed").await?,
            items_extracted: read("items_extracted").await?,
            urls_discovered: read("urls_discovered").await?,
            errors: read("errors").await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn deltas_accumulate_across_workers() {
        let counters = ExecutionCounters::new(Arc::new(MemoryKvStore::new()));
        counters.incr_published("e1", 3).await.expect("publish");
        counters
            .apply_delta(
                "e1",
                StatsDelta { tasks_processed: 2, items_extracted: 5, urls_discovered: 1, errors: 0 },
            )
            .await
            .expect("delta");
        counters
            .apply_delta(
                "e1",
                StatsDelta { tasks_processed: 1, items_extracted: 0, urls_discovered: 2, errors: 1 },
            )
            .await
            .expect("delta");

        let totals = counters.totals("e1").await.expect("totals");
        assert_eq!(totals.tasks_published, 3);
        assert_eq!(totals.tasks_processed, 3);
        assert_eq!(totals.items_extracted, 5);
        assert_eq!(totals.urls_discovered, 3);
        assert_eq!(totals.errors, 1);
        assert_eq!(totals.inflight(), 0);
    }
}
