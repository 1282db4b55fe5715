//! Task messages and their canonical JSON encoding
//!
//! A task is one unit of URL work. It carries a full snapshot of its phase
//! and the workflow config so a worker can execute it without any lookup;
//! tasks are immutable once published.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::profile::BrowserProfile;
use super::workflow::{Phase, WorkflowConfig};

/// Free-form metadata attached to every task
///
/// `phases` lets a worker resolve phase transitions locally; `node_profiles`
/// embeds browser-profile snapshots so driver switches need no lookup.
/// Anything else producers attach survives in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    /// Requeue delay in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub node_profiles: HashMap<String, BrowserProfile>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One unit of URL work flowing through the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub execution_id: String,
    pub workflow_id: String,
    pub url: String,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url_id: Option<String>,
    #[serde(default)]
    pub marker: String,
    pub phase_id: String,
    /// Full snapshot of the phase this task executes
    pub phase_config: Phase,
    #[serde(default)]
    pub workflow_config: WorkflowConfig,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_profile_id: Option<String>,
}

impl Task {
    /// Build a seed task for the given phase
    #[must_use]
    pub fn seed(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        url: impl Into<String>,
        phase: Phase,
        workflow_config: WorkflowConfig,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            url: url.into(),
            depth: 0,
            parent_url_id: None,
            marker: String::new(),
            phase_id: phase.id.clone(),
            phase_config: phase,
            workflow_config,
            metadata: TaskMetadata::default(),
            retry_count: 0,
            proxy_url: None,
            proxy_id: None,
            browser_profile_id: None,
        }
    }

    /// Build a child task for a discovered URL
    ///
    /// Depth is always `parent.depth + 1` and the marker is either inherited
    /// from the parent or set by the discovering node; callers cannot
    /// produce a child violating either invariant.
    #[must_use]
    pub fn child(&self, url: impl Into<String>, node_marker: Option<&str>, phase: Phase) -> Self {
        let marker = match node_marker {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.marker.clone(),
        };
        Self {
            task_id: Uuid::new_v4().to_string(),
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            url: url.into(),
            depth: self.depth + 1,
            parent_url_id: Some(self.task_id.clone()),
            marker,
            phase_id: phase.id.clone(),
            phase_config: phase,
            workflow_config: self.workflow_config.clone(),
            metadata: self.metadata.clone(),
            retry_count: 0,
            proxy_url: None,
            proxy_id: None,
            browser_profile_id: self.browser_profile_id.clone(),
        }
    }

    /// Effective depth ceiling for this task's workflow
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.metadata
            .max_depth
            .unwrap_or(self.workflow_config.max_depth)
    }

    /// Effective requeue delay in milliseconds
    #[must_use]
    pub fn rate_limit_delay_ms(&self) -> u64 {
        self.metadata
            .rate_limit_delay
            .unwrap_or(self.workflow_config.rate_limit_delay)
    }

    /// Encode into the canonical JSON wire format
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the canonical JSON wire format
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::workflow::{PhaseTransition, PhaseType};

    fn phase(id: &str) -> Phase {
        Phase {
            id: id.to_string(),
            phase_type: PhaseType::Discovery,
            nodes: vec![],
            url_filter: None,
            transition: None,
        }
    }

    #[test]
    fn child_increments_depth_and_links_parent() {
        let seed = Task::seed("ex-1", "wf-1", "http://x/a", phase("p1"), WorkflowConfig::default());
        let child = seed.child("http://x/b", None, phase("p1"));

        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_url_id.as_deref(), Some(seed.task_id.as_str()));
        assert_eq!(child.execution_id, "ex-1");
        assert_eq!(child.retry_count, 0);
    }

    #[test]
    fn child_marker_propagation_is_monotone() {
        let mut seed = Task::seed("ex-1", "wf-1", "http://x/a", phase("p1"), WorkflowConfig::default());
        seed.marker = "listing".to_string();

        // inherited when the node sets none
        let inherited = seed.child("http://x/b", None, phase("p1"));
        assert_eq!(inherited.marker, "listing");

        // empty node marker also inherits
        let empty = seed.child("http://x/c", Some(""), phase("p1"));
        assert_eq!(empty.marker, "listing");

        // node marker wins when set
        let tagged = seed.child("http://x/d", Some("product"), phase("p1"));
        assert_eq!(tagged.marker, "product");
    }

    #[test]
    fn wire_round_trip_preserves_phase_snapshot() {
        let mut task = Task::seed(
            "ex-9",
            "wf-9",
            "https://shop.example/catalog",
            Phase {
                id: "list".to_string(),
                phase_type: PhaseType::Discovery,
                nodes: vec![crate::model::Node::new(
                    "n1",
                    "extract_links",
                    serde_json::json!({"selector": ".p", "marker": "product"}),
                )],
                url_filter: None,
                transition: Some(PhaseTransition {
                    next_phase: "detail".to_string(),
                    condition: None,
                }),
            },
            WorkflowConfig {
                max_depth: 2,
                rate_limit_delay: 100,
                default_browser_name: Some("firefox".to_string()),
                ..WorkflowConfig::default()
            },
        );
        task.metadata.phases = vec![task.phase_config.clone(), phase("detail")];
        task.metadata.max_depth = Some(2);

        let bytes = task.encode().expect("task encodes");
        let decoded = Task::decode(&bytes).expect("task decodes");

        assert_eq!(decoded.task_id, task.task_id);
        assert_eq!(decoded.phase_config.nodes[0].param_str("marker"), Some("product"));
        assert_eq!(
            decoded.phase_config.transition.as_ref().map(|t| t.next_phase.as_str()),
            Some("detail")
        );
        assert_eq!(decoded.metadata.phases.len(), 2);
        assert_eq!(decoded.workflow_config.default_browser_name.as_deref(), Some("firefox"));
    }
}
