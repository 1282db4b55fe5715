//! Execution lifecycle: seeding, monitoring, cancellation

use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::TaskBus;
use crate::executor::task_executor::cancellation_key;
use crate::model::{
    BrowserProfile, Execution, ExecutionStatus, StatsDelta, Task, TaskMetadata, Workflow,
};
use crate::stats::ExecutionCounters;
use crate::store::{KvStore, StoreError};

use super::profiles::ProfileStore;

/// Quiescence and bookkeeping tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Poll cadence for the completion monitor
    pub poll_interval: Duration,
    /// Consecutive zero-inflight observations before completion
    pub quiescence_ticks: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            quiescence_ticks: 2,
        }
    }
}

/// The control plane's execution engine
pub struct Orchestrator {
    bus: Arc<dyn TaskBus>,
    kv: Arc<dyn KvStore>,
    profiles: Arc<dyn ProfileStore>,
    counters: ExecutionCounters,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        bus: Arc<dyn TaskBus>,
        kv: Arc<dyn KvStore>,
        profiles: Arc<dyn ProfileStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let counters = ExecutionCounters::new(Arc::clone(&kv));
        Self { bus, kv, profiles, counters, config }
    }

    fn execution_key(execution_id: &str) -> String {
        format!("execution:{execution_id}")
    }

    /// Start an execution: build seed tasks and publish them
    ///
    /// Each seed carries the full phase snapshot, the complete phase list,
    /// the workflow limits and any referenced profile snapshots, so no
    /// worker ever needs to read the workflow back.
    pub async fn start_execution(&self, workflow: &Workflow) -> Result<Execution, StoreError> {
        let mut execution = Execution::start(&workflow.id);

        let Some(first_phase) = workflow.first_phase() else {
            warn!("workflow {} has no phases, failing execution", workflow.id);
            execution.finish(ExecutionStatus::Failed);
            self.save(&execution).await?;
            return Ok(execution);
        };

        let metadata = self.build_metadata(workflow).await?;
        let seeds: Vec<Task> = workflow
            .seed_urls
            .iter()
            .map(|url| {
                let mut task = Task::seed(
                    &execution.execution_id,
                    &workflow.id,
                    url,
                    first_phase.clone(),
                    workflow.config.clone(),
                );
                task.metadata = metadata.clone();
                task.browser_profile_id = workflow.config.default_profile_id.clone();
                task
            })
            .collect();

        match self.bus.publish_batch(&seeds).await {
            Ok(result) if result.published > 0 => {
                execution.tasks_published = result.published as u64;
                self.counters
                    .incr_published(&execution.execution_id, result.published as u64)
                    .await?;
                info!(
                    "execution {} started: {} seed tasks into phase {}",
                    execution.execution_id, result.published, first_phase.id
                );
            }
            Ok(_) | Err(_) => {
                // seed publication failing is the one thing that fails an
                // execution outright
                warn!("seed publish failed for workflow {}", workflow.id);
                execution.finish(ExecutionStatus::Failed);
            }
        }

        self.save(&execution).await?;
        Ok(execution)
    }

    async fn build_metadata(&self, workflow: &Workflow) -> Result<TaskMetadata, StoreError> {
        let mut node_profiles: HashMap<String, BrowserProfile> = HashMap::new();

        let mut wanted = workflow.referenced_profile_ids();
        if let Some(default_id) = &workflow.config.default_profile_id
            && !wanted.iter().any(|id| id == default_id)
        {
            wanted.push(default_id.clone());
        }
        for profile_id in wanted {
            match self.profiles.get(&profile_id).await? {
                Some(profile) => {
                    node_profiles.insert(profile_id, profile);
                }
                None => warn!(
                    "workflow {} references unknown profile {profile_id}",
                    workflow.id
                ),
            }
        }

        Ok(TaskMetadata {
            phases: workflow.phases.clone(),
            max_depth: Some(workflow.config.max_depth),
            rate_limit_delay: Some(workflow.config.rate_limit_delay),
            node_profiles,
            extra: HashMap::new(),
        })
    }

    /// Block until the execution quiesces, then mark it completed
    ///
    /// Quiescence is an explicit observation window: published equals
    /// processed (zero in-flight) with work actually done, seen on
    /// `quiescence_ticks` consecutive polls.
    pub async fn monitor_to_completion(
        &self,
        execution_id: &str,
    ) -> Result<Execution, StoreError> {
        let mut streak = 0u32;
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let mut execution = match self.get_execution(execution_id).await? {
                Some(execution) => execution,
                None => {
                    return Err(StoreError::Other(format!(
                        "unknown execution {execution_id}"
                    )));
                }
            };
            if execution.status.is_terminal() {
                return Ok(execution);
            }

            let totals = self.counters.totals(execution_id).await?;
            execution.tasks_published = totals.tasks_published;
            execution.stats = StatsDelta {
                tasks_processed: totals.tasks_processed,
                items_extracted: totals.items_extracted,
                urls_discovered: totals.urls_discovered,
                errors: totals.errors,
            };

            let quiet = totals.tasks_published > 0 && totals.inflight() == 0;
            streak = if quiet { streak + 1 } else { 0 };

            if streak >= self.config.quiescence_ticks {
                execution.finish(ExecutionStatus::Completed);
                info!(
                    "execution {execution_id} completed: {} tasks, {} items, {} errors",
                    totals.tasks_processed, totals.items_extracted, totals.errors
                );
            }
            self.save(&execution).await?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }
        }
    }

    /// Request cancellation; workers drop in-flight tasks after their
    /// current node
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<(), StoreError> {
        self.kv
            .set(&cancellation_key(execution_id), "1", None)
            .await?;
        if let Some(mut execution) = self.get_execution(execution_id).await? {
            execution.finish(ExecutionStatus::Cancelled);
            self.save(&execution).await?;
        }
        info!("execution {execution_id} cancelled");
        Ok(())
    }

    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<Execution>, StoreError> {
        let key = Self::execution_key(execution_id);
        match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(&key, e)),
            None => Ok(None),
        }
    }

    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        let key = Self::execution_key(&execution.execution_id);
        let raw = serde_json::to_string(execution).map_err(|e| StoreError::corrupt(&key, e))?;
        self.kv.set(&key, &raw, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryTaskBus;
    use crate::model::{Node, Phase, PhaseType, WorkflowConfig};
    use crate::orchestrator::profiles::MemoryProfileStore;
    use crate::store::MemoryKvStore;

    fn workflow(seeds: &[&str]) -> Workflow {
        Workflow {
            id: "wf-1".to_string(),
            name: "test".to_string(),
            phases: vec![Phase {
                id: "p1".to_string(),
                phase_type: PhaseType::Discovery,
                nodes: vec![Node::new("n1", "navigate", serde_json::json!({}))],
                url_filter: None,
                transition: None,
            }],
            config: WorkflowConfig { max_depth: 2, rate_limit_delay: 50, ..Default::default() },
            version: 1,
            seed_urls: seeds.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn orchestrator(bus: Arc<MemoryTaskBus>, kv: Arc<MemoryKvStore>) -> Orchestrator {
        Orchestrator::new(
            bus,
            kv,
            Arc::new(MemoryProfileStore::new()),
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn seeds_carry_full_snapshots() {
        let bus = Arc::new(MemoryTaskBus::new(16));
        let kv = Arc::new(MemoryKvStore::new());
        let orch = orchestrator(Arc::clone(&bus), kv);

        let execution = orch
            .start_execution(&workflow(&["http://x/a", "http://x/b"]))
            .await
            .expect("start");

        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.tasks_published, 2);
        assert_eq!(bus.metrics().snapshot().published, 2);
    }

    #[tokio::test]
    async fn empty_workflow_fails_fast() {
        let bus = Arc::new(MemoryTaskBus::new(16));
        let kv = Arc::new(MemoryKvStore::new());
        let orch = orchestrator(bus, Arc::clone(&kv));

        let mut wf = workflow(&["http://x/a"]);
        wf.phases.clear();
        let execution = orch.start_execution(&wf).await.expect("start");
        assert_eq!(execution.status, ExecutionStatus::Failed);

        let persisted = orch
            .get_execution(&execution.execution_id)
            .await
            .expect("get")
            .expect("saved");
        assert_eq!(persisted.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_sets_the_worker_flag() {
        let bus = Arc::new(MemoryTaskBus::new(16));
        let kv = Arc::new(MemoryKvStore::new());
        let orch = orchestrator(bus, Arc::clone(&kv));

        let execution = orch
            .start_execution(&workflow(&["http://x/a"]))
            .await
            .expect("start");
        orch.cancel_execution(&execution.execution_id)
            .await
            .expect("cancel");

        let flag = kv
            .get(&cancellation_key(&execution.execution_id))
            .await
            .expect("get");
        assert_eq!(flag, Some("1".to_string()));

        let persisted = orch
            .get_execution(&execution.execution_id)
            .await
            .expect("get")
            .expect("saved");
        assert_eq!(persisted.status, ExecutionStatus::Cancelled);
    }
}
