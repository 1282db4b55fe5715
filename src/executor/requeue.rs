//! Discovered-URL requeue pipeline
//!
//! Builds child tasks for a parent's discovered URLs: resolves the next
//! phase, enforces the depth ceiling, dedups per (execution, phase),
//! applies the workflow's rate-limit delay and publishes the batch in
//! insertion order.

use log::{debug, info};
use std::time::Duration;

use crate::bus::TaskBus;
use crate::model::{Task, workflow};
use crate::nodes::DiscoveredUrl;
use crate::stats::ExecutionCounters;
use crate::store::Deduplicator;

use super::errors::ExecError;

/// Publish child tasks for the URLs a parent discovered
///
/// Returns how many children were published.
pub async fn requeue_discovered(
    task: &Task,
    discovered: &[DiscoveredUrl],
    dedup: &Deduplicator,
    bus: &dyn TaskBus,
    counters: &ExecutionCounters,
) -> Result<u64, ExecError> {
    if discovered.is_empty() {
        return Ok(0);
    }

    let max_depth = task.max_depth();
    if task.depth + 1 > max_depth {
        debug!(
            "dropping {} discovered urls: children would exceed depth {max_depth}",
            discovered.len()
        );
        return Ok(0);
    }

    let next_phase = workflow::next_phase(&task.phase_config, &task.metadata.phases);

    let mut children = Vec::with_capacity(discovered.len());
    for found in discovered {
        // publish-side dedup: a URL already claimed for the target phase
        // is in flight or done, so the child would be wasted work
        if dedup
            .seen(&task.execution_id, &next_phase.id, &found.url)
            .await?
        {
            continue;
        }
        children.push(task.child(&found.url, found.marker.as_deref(), next_phase.clone()));
    }

    if children.is_empty() {
        return Ok(0);
    }

    let delay_ms = task.rate_limit_delay_ms();
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let result = bus
        .publish_batch(&children)
        .await
        .map_err(|e| ExecError::Fatal(format!("requeue publish failed: {e}")))?;
    counters
        .incr_published(&task.execution_id, result.published as u64)
        .await?;

    info!(
        "requeued {}/{} children of {} into phase {}",
        result.published,
        discovered.len(),
        task.task_id,
        next_phase.id
    );
    Ok(result.published as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryTaskBus;
    use crate::model::{Phase, PhaseTransition, PhaseType, WorkflowConfig};
    use crate::store::MemoryKvStore;
    use std::sync::Arc;

    fn phase(id: &str, next: Option<&str>) -> Phase {
        Phase {
            id: id.to_string(),
            phase_type: PhaseType::Discovery,
            nodes: vec![],
            url_filter: None,
            transition: next.map(|n| PhaseTransition {
                next_phase: n.to_string(),
                condition: None,
            }),
        }
    }

    fn parent(max_depth: u32) -> Task {
        let mut task = Task::seed(
            "e1",
            "w1",
            "http://x/seed",
            phase("list", Some("detail")),
            WorkflowConfig { max_depth, ..WorkflowConfig::default() },
        );
        task.metadata.phases = vec![phase("list", Some("detail")), phase("detail", None)];
        task
    }

    fn found(url: &str, marker: Option<&str>) -> DiscoveredUrl {
        DiscoveredUrl { url: url.to_string(), marker: marker.map(str::to_string) }
    }

    #[tokio::test]
    async fn children_route_to_the_next_phase_with_markers() {
        let bus = Arc::new(MemoryTaskBus::new(16));
        let store = Arc::new(MemoryKvStore::new());
        let dedup = Deduplicator::new(Arc::clone(&store) as Arc<dyn crate::store::KvStore>);
        let counters = ExecutionCounters::new(store as Arc<dyn crate::store::KvStore>);

        let task = parent(3);
        let published = requeue_discovered(
            &task,
            &[found("http://x/p1", Some("product")), found("http://x/p2", Some("product"))],
            &dedup,
            bus.as_ref(),
            &counters,
        )
        .await
        .expect("requeue");

        assert_eq!(published, 2);
        assert_eq!(counters.totals("e1").await.expect("totals").tasks_published, 2);
        assert_eq!(bus.metrics().snapshot().published, 2);
    }

    #[tokio::test]
    async fn depth_ceiling_drops_the_whole_batch() {
        let bus = Arc::new(MemoryTaskBus::new(16));
        let store = Arc::new(MemoryKvStore::new());
        let dedup = Deduplicator::new(Arc::clone(&store) as Arc<dyn crate::store::KvStore>);
        let counters = ExecutionCounters::new(store as Arc<dyn crate::store::KvStore>);

        let mut task = parent(1);
        task.depth = 1;
        let published = requeue_discovered(
            &task,
            &[found("http://x/deep", None)],
            &dedup,
            bus.as_ref(),
            &counters,
        )
        .await
        .expect("requeue");

        assert_eq!(published, 0);
        assert_eq!(bus.metrics().snapshot().published, 0);
    }

    #[tokio::test]
    async fn urls_already_claimed_for_the_phase_are_skipped() {
        let bus = Arc::new(MemoryTaskBus::new(16));
        let store = Arc::new(MemoryKvStore::new());
        let kv = Arc::clone(&store) as Arc<dyn crate::store::KvStore>;
        let dedup = Deduplicator::new(Arc::clone(&kv));
        let counters = ExecutionCounters::new(kv);

        // someone already claimed this URL in the detail phase
        dedup.claim("e1", "detail", "http://x/p1").await.expect("claim");

        let task = parent(3);
        let published = requeue_discovered(
            &task,
            &[found("http://x/p1", None), found("http://x/p2", None)],
            &dedup,
            bus.as_ref(),
            &counters,
        )
        .await
        .expect("requeue");

        assert_eq!(published, 1);
    }
}
