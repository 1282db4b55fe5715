//! Runtime configuration for workers and the orchestrator
//!
//! Settings come from the environment (`CRAWLIFY_*` variables) through the
//! builder, which validates and normalises before handing out an immutable
//! config.

pub mod builder;
pub mod types;

pub use builder::{OrchestratorSettingsBuilder, WorkerSettingsBuilder};
pub use types::{OrchestratorSettings, WorkerSettings};
