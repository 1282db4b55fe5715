//! Incident creation for tasks leaving the automated recovery loop

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::classifier::{DetectedError, ErrorPattern};
use crate::model::{IncidentPriority, IncidentReport, RecoveryAttempt, Task};
use crate::store::StoreError;

/// Narrow persistence seam for incident reports
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create(&self, report: IncidentReport) -> Result<(), StoreError>;
}

/// In-memory incident store for tests and single-process runs
#[derive(Default)]
pub struct MemoryIncidentStore {
    reports: Mutex<Vec<IncidentReport>>,
}

impl MemoryIncidentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<IncidentReport> {
        self.reports.lock().await.clone()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn create(&self, report: IncidentReport) -> Result<(), StoreError> {
        self.reports.lock().await.push(report);
        Ok(())
    }
}

/// Incident store over the shared kv-store
///
/// Reports append to a single list; triage tooling drains it out of band.
pub struct KvIncidentStore {
    store: Arc<dyn crate::store::KvStore>,
}

impl KvIncidentStore {
    const KEY: &'static str = "incidents:open";

    #[must_use]
    pub fn new(store: Arc<dyn crate::store::KvStore>) -> Self {
        Self { store }
    }

    pub async fn open_reports(&self) -> Result<Vec<IncidentReport>, StoreError> {
        let raw = self.store.list_range(Self::KEY).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

#[async_trait]
impl IncidentStore for KvIncidentStore {
    async fn create(&self, report: IncidentReport) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&report)
            .map_err(|e| StoreError::corrupt(Self::KEY, e))?;
        self.store.list_push(Self::KEY, &raw, None, None).await
    }
}

/// Builds and persists incident reports
pub struct IncidentReporter {
    store: Arc<dyn IncidentStore>,
}

impl IncidentReporter {
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    /// Open an incident for a task that exhausted recovery
    pub async fn report(
        &self,
        task: &Task,
        detected: &DetectedError,
        attempts: Vec<RecoveryAttempt>,
    ) -> Result<(), StoreError> {
        let mut report = IncidentReport::open(
            &task.task_id,
            &task.execution_id,
            &task.workflow_id,
            &task.url,
            detected.pattern.as_str(),
            &detected.message,
            priority_of(detected.pattern),
        );
        report.recovery_attempts = attempts;

        info!(
            "opening incident for task {} ({} on {})",
            task.task_id,
            detected.pattern.as_str(),
            detected.domain
        );
        self.store.create(report).await
    }
}

/// Auth walls and captchas need human eyes soonest
fn priority_of(pattern: ErrorPattern) -> IncidentPriority {
    match pattern {
        ErrorPattern::BlockedByCaptcha | ErrorPattern::AuthRequired => IncidentPriority::High,
        ErrorPattern::Unknown => IncidentPriority::Low,
        _ => IncidentPriority::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Phase, PhaseType, WorkflowConfig};

    fn test_task() -> Task {
        Task::seed(
            "e1",
            "w1",
            "https://x.example/login",
            Phase {
                id: "p1".to_string(),
                phase_type: PhaseType::Extraction,
                nodes: vec![],
                url_filter: None,
                transition: None,
            },
            WorkflowConfig::default(),
        )
    }

    #[tokio::test]
    async fn report_opens_with_pattern_priority() {
        let store = Arc::new(MemoryIncidentStore::new());
        let reporter = IncidentReporter::new(store.clone());

        let detected = DetectedError {
            pattern: ErrorPattern::AuthRequired,
            domain: "x.example".to_string(),
            status: Some(401),
            message: "401 Unauthorized".to_string(),
        };
        reporter
            .report(&test_task(), &detected, vec![])
            .await
            .expect("report");

        let reports = store.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].priority, IncidentPriority::High);
        assert_eq!(reports[0].error_pattern, "auth_required");
        assert_eq!(reports[0].status, crate::model::IncidentStatus::Open);
    }
}
