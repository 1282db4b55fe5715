//! Node registry and built-in executors
//!
//! A phase is an ordered list of nodes; each node type tag resolves through
//! the registry to an executor that reads its own parameters, acts on the
//! current page and mutates the execution context. Branch nodes queued by
//! `conditional` run after the producing node and before the next
//! top-level node.

pub mod context;
pub mod control;
pub mod extract;
pub mod interact;
pub mod links;
pub mod navigate;
pub mod paginate;
pub mod registry;
pub mod script;
pub mod wait;

pub use context::{DiscoveredUrl, DriverSwitcher, ExecutionContext, SwitchTarget};
pub use registry::{NodeExecutor, NodeRegistry, run_phase_nodes};
