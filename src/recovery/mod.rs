//! Smart error recovery
//!
//! Four collaborators share the distributed kv-store: the classifier maps
//! raw failures to patterns, the sliding-window tracker decides when a
//! domain's failures warrant action, the rule engine picks the action, and
//! the proxy manager and incident reporter carry it out. The manager wires
//! them into a single `try_recover` entry point the task executor calls on
//! failure.

pub mod classifier;
pub mod incidents;
pub mod manager;
pub mod plan;
pub mod proxy;
pub mod rules;
pub mod tracker;

pub use classifier::{DetectedError, ErrorClassifier, ErrorPattern};
pub use incidents::{IncidentReporter, IncidentStore, KvIncidentStore, MemoryIncidentStore};
pub use manager::{RecoveryConfig, RecoveryManager};
pub use plan::{PlanSource, RecoveryPlan};
pub use proxy::{ProxyLease, ProxyManager, ProxyManagerConfig};
pub use rules::{RecoveryAction, RecoveryRule, RuleEngine};
pub use tracker::{SlidingWindowTracker, TrackerConfig};
