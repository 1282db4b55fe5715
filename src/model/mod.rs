//! Core data model shared by the orchestrator and workers
//!
//! Everything that crosses the bus or a store boundary lives here with its
//! canonical JSON encoding. Task messages are self-contained: a worker can
//! execute a task from its snapshot alone, without re-reading the workflow.

pub mod execution;
pub mod incident;
pub mod profile;
pub mod proxy;
pub mod task;
pub mod workflow;

pub use execution::{ExecutedItem, Execution, ExecutionStatus, StatsDelta};
pub use incident::{IncidentPriority, IncidentReport, IncidentStatus, RecoveryAttempt};
pub use profile::{BrowserFamily, BrowserProfile, DriverKind};
pub use proxy::{Proxy, ProxyConfig};
pub use task::{Task, TaskMetadata};
pub use workflow::{
    Node, Phase, PhaseTransition, PhaseType, UrlFilter, Workflow, WorkflowConfig,
};
