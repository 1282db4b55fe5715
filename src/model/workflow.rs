//! Workflow, phase and node definitions
//!
//! A workflow is a declarative, versioned description of a multi-phase
//! scrape: an ordered list of phases, each an ordered list of nodes. Phases
//! route tasks between each other through markers and transitions; the
//! transition graph must form a DAG over the phase list.

use serde::{Deserialize, Serialize};

/// Classification of a phase's role within a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    /// Seeds and expands the URL frontier
    Discovery,
    /// Pulls structured items out of pages
    Extraction,
    /// Post-processes previously extracted data
    Processing,
    /// User-defined phase with no special routing semantics
    Custom,
}

/// A single declarative operation within a phase
///
/// The `params` map is the only runtime-interpreted surface; it is parsed by
/// the registered executor for `node_type`. Unknown keys are ignored by
/// executors, missing required keys fail the node with a validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Node {
    /// Build a node with the given type tag and JSON parameters
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            params,
        }
    }

    /// Fetch a string parameter by key
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Fetch an unsigned integer parameter by key
    #[must_use]
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Fetch a boolean parameter by key
    #[must_use]
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(serde_json::Value::as_bool)
    }
}

/// Filter deciding whether a task may enter a phase
///
/// A task passes iff its marker is in `markers` (when the set is non-empty)
/// and its depth equals `depth` (when set). `depth: None` matches any depth;
/// `Some(0)` matches only seed tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl UrlFilter {
    /// Evaluate the filter against a task's marker and depth
    #[must_use]
    pub fn accepts(&self, marker: &str, depth: u32) -> bool {
        if !self.markers.is_empty() && !self.markers.iter().any(|m| m == marker) {
            return false;
        }
        match self.depth {
            Some(required) => depth == required,
            None => true,
        }
    }
}

/// Routing of child tasks out of a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub next_phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Named, ordered sequence of nodes applied to every task routed to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    #[serde(rename = "type")]
    pub phase_type: PhaseType,
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<UrlFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<PhaseTransition>,
}

impl Phase {
    /// Whether a task with the given marker/depth may execute this phase
    #[must_use]
    pub fn accepts(&self, marker: &str, depth: u32) -> bool {
        self.url_filter
            .as_ref()
            .is_none_or(|f| f.accepts(marker, depth))
    }
}

/// Workflow-level configuration snapshotted into every task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Delay applied before each requeue batch, in milliseconds
    #[serde(default)]
    pub rate_limit_delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_driver: Option<String>,
    /// Browser family used for TLS/UA fingerprinting by the static driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_browser_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile_id: Option<String>,
}

fn default_max_depth() -> u32 {
    3
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            rate_limit_delay: 0,
            default_driver: None,
            default_browser_name: None,
            default_profile_id: None,
        }
    }
}

/// Versioned workflow definition owned by the orchestrator
///
/// Referenced but never mutated by an in-flight execution; every config
/// mutation through the API bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub config: WorkflowConfig,
    #[serde(default)]
    pub version: u64,
    /// Seed URLs materialised into the first phase on execution start
    #[serde(default)]
    pub seed_urls: Vec<String>,
}

impl Workflow {
    /// Look up a phase by ID
    #[must_use]
    pub fn phase(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    /// First phase in declaration order, if any
    #[must_use]
    pub fn first_phase(&self) -> Option<&Phase> {
        self.phases.first()
    }

    /// Collect every `profile_id` referenced by a node parameter
    ///
    /// Used by the orchestrator to embed profile snapshots into task
    /// metadata so workers never need a profile lookup.
    #[must_use]
    pub fn referenced_profile_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for phase in &self.phases {
            for node in &phase.nodes {
                if let Some(id) = node.param_str("profile_id")
                    && !ids.iter().any(|existing| existing == id)
                {
                    ids.push(id.to_string());
                }
            }
        }
        ids
    }
}

/// Resolve the phase a child task should be routed to
///
/// Reads the current phase's transition and searches the phase list carried
/// in task metadata; when no transition is declared or the target is
/// missing, the child stays in the current phase.
#[must_use]
pub fn next_phase<'a>(current: &'a Phase, phases: &'a [Phase]) -> &'a Phase {
    match &current.transition {
        Some(t) => phases.iter().find(|p| p.id == t.next_phase).unwrap_or(current),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(id: &str, transition: Option<&str>) -> Phase {
        Phase {
            id: id.to_string(),
            phase_type: PhaseType::Discovery,
            nodes: vec![],
            url_filter: None,
            transition: transition.map(|t| PhaseTransition {
                next_phase: t.to_string(),
                condition: None,
            }),
        }
    }

    #[test]
    fn filter_accepts_any_marker_when_empty() {
        let filter = UrlFilter::default();
        assert!(filter.accepts("", 0));
        assert!(filter.accepts("product", 7));
    }

    #[test]
    fn filter_requires_listed_marker() {
        let filter = UrlFilter {
            markers: vec!["product".to_string()],
            depth: None,
        };
        assert!(filter.accepts("product", 1));
        assert!(!filter.accepts("category", 1));
        assert!(!filter.accepts("", 1));
    }

    #[test]
    fn filter_depth_is_tristate() {
        let unset = UrlFilter { markers: vec![], depth: None };
        assert!(unset.accepts("", 0));
        assert!(unset.accepts("", 5));

        let zero = UrlFilter { markers: vec![], depth: Some(0) };
        assert!(zero.accepts("", 0));
        assert!(!zero.accepts("", 1));
    }

    #[test]
    fn next_phase_follows_transition() {
        let phases = vec![phase("list", Some("detail")), phase("detail", None)];
        assert_eq!(next_phase(&phases[0], &phases).id, "detail");
        assert_eq!(next_phase(&phases[1], &phases).id, "detail");
    }

    #[test]
    fn next_phase_falls_back_to_current_when_target_missing() {
        let phases = vec![phase("list", Some("gone"))];
        assert_eq!(next_phase(&phases[0], &phases).id, "list");
    }

    #[test]
    fn workflow_round_trips_through_json() {
        let workflow = Workflow {
            id: "wf-1".to_string(),
            name: "catalog".to_string(),
            phases: vec![Phase {
                id: "list".to_string(),
                phase_type: PhaseType::Discovery,
                nodes: vec![Node::new(
                    "n1",
                    "navigate",
                    serde_json::json!({"wait_for": ".grid"}),
                )],
                url_filter: Some(UrlFilter {
                    markers: vec!["product".to_string()],
                    depth: Some(1),
                }),
                transition: Some(PhaseTransition {
                    next_phase: "detail".to_string(),
                    condition: None,
                }),
            }],
            config: WorkflowConfig {
                max_depth: 2,
                rate_limit_delay: 250,
                ..WorkflowConfig::default()
            },
            version: 4,
            seed_urls: vec!["https://shop.example/catalog".to_string()],
        };

        let encoded = serde_json::to_string(&workflow).expect("workflow serializes");
        let decoded: Workflow = serde_json::from_str(&encoded).expect("workflow deserializes");
        assert_eq!(decoded.id, "wf-1");
        assert_eq!(decoded.phases[0].nodes[0].node_type, "navigate");
        assert_eq!(decoded.phases[0].url_filter.as_ref().and_then(|f| f.depth), Some(1));
        assert_eq!(decoded.config.max_depth, 2);
    }
}
