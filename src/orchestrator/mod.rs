//! Orchestrator executor
//!
//! Owns execution lifecycle only: materialises a workflow's seed URLs into
//! fully self-contained tasks, publishes them, polls the shared counters
//! for quiescence and transitions executions to their terminal states.
//! Cancellation is a flag in the shared store that workers observe between
//! nodes.

pub mod executions;
pub mod profiles;

pub use executions::{Orchestrator, OrchestratorConfig};
pub use profiles::{MemoryProfileStore, ProfileStore};
