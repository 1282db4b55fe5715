//! Incident reports for tasks that left the automated recovery loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Triage priority of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Triage state of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// One recovery attempt recorded against a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub action: String,
    pub error_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub succeeded: bool,
}

/// Persisted report describing a task that exhausted automated recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: String,
    pub task_id: String,
    pub execution_id: String,
    pub workflow_id: String,
    pub url: String,
    /// Snapshot of the last detected error
    pub error_pattern: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_attempts: Vec<RecoveryAttempt>,
    /// Opaque reasoning text filled in by the external suggestion path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<String>,
    pub priority: IncidentPriority,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
}

impl IncidentReport {
    /// Open a new incident for a failed task
    #[must_use]
    pub fn open(
        task_id: impl Into<String>,
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        url: impl Into<String>,
        error_pattern: impl Into<String>,
        error_message: impl Into<String>,
        priority: IncidentPriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            url: url.into(),
            error_pattern: error_pattern.into(),
            error_message: error_message.into(),
            recovery_attempts: Vec::new(),
            ai_reasoning: None,
            priority,
            status: IncidentStatus::Open,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_for_triage() {
        assert!(IncidentPriority::Critical > IncidentPriority::High);
        assert!(IncidentPriority::Medium > IncidentPriority::Low);
    }

    #[test]
    fn new_incidents_open() {
        let incident = IncidentReport::open(
            "t1", "e1", "w1",
            "https://example.com/login",
            "auth_required",
            "401 Unauthorized",
            IncidentPriority::Medium,
        );
        assert_eq!(incident.status, IncidentStatus::Open);
        assert!(incident.recovery_attempts.is_empty());
    }
}
