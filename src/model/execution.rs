//! Execution lifecycle records and statistics deltas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution will make no further progress
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Additive counter deltas reported by workers
///
/// Execution counters are only ever updated with `+=` deltas, so concurrent
/// workers can report without coordination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDelta {
    pub tasks_processed: u64,
    pub items_extracted: u64,
    pub urls_discovered: u64,
    pub errors: u64,
}

impl StatsDelta {
    /// Merge another delta into this one
    pub fn merge(&mut self, other: Self) {
        self.tasks_processed += other.tasks_processed;
        self.items_extracted += other.items_extracted;
        self.urls_discovered += other.urls_discovered;
        self.errors += other.errors;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub stats: StatsDelta,
    /// Total tasks published into the bus for this execution
    #[serde(default)]
    pub tasks_published: u64,
}

impl Execution {
    /// Start a new execution for the given workflow
    #[must_use]
    pub fn start(workflow_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            metadata: HashMap::new(),
            stats: StatsDelta::default(),
            tasks_published: 0,
        }
    }

    /// Transition into a terminal state, stamping the end time once
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// A single extracted item, insertion-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedItem {
    pub execution_id: String,
    pub workflow_id: String,
    pub task_id: String,
    pub url: String,
    pub data: serde_json::Value,
    pub extracted_at: DateTime<Utc>,
}

impl ExecutedItem {
    /// Build an item stamped with the current time
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        url: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            url: url.into(),
            data,
            extracted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_merge_additively() {
        let mut total = StatsDelta {
            tasks_processed: 1,
            items_extracted: 2,
            urls_discovered: 3,
            errors: 0,
        };
        total.merge(StatsDelta {
            tasks_processed: 1,
            items_extracted: 0,
            urls_discovered: 4,
            errors: 2,
        });
        assert_eq!(total.tasks_processed, 2);
        assert_eq!(total.urls_discovered, 7);
        assert_eq!(total.errors, 2);
    }

    #[test]
    fn finish_stamps_end_time_once() {
        let mut execution = Execution::start("wf-1");
        assert_eq!(execution.status, ExecutionStatus::Running);

        execution.finish(ExecutionStatus::Completed);
        let first_end = execution.ended_at;
        assert!(first_end.is_some());

        execution.finish(ExecutionStatus::Failed);
        assert_eq!(execution.ended_at, first_end);
    }
}
