//! Task bus: publication, subscription, dead-lettering
//!
//! The bus abstraction is one primary topic plus a dead-letter topic, with
//! at-least-once delivery. Message bodies are canonical-JSON tasks and the
//! attributes carry `execution_id`/`workflow_id` for routing. The in-memory
//! implementation backs tests and single-process deployments; a hosted
//! queue slots in behind the same trait.

pub mod errors;
pub mod memory;
pub mod metrics;
pub mod subscriber;
pub mod traits;

pub use errors::BusError;
pub use memory::{MemoryTaskBus, MemoryTaskBusConfig};
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use subscriber::{SubscriberConfig, SubscriptionHandle};
pub use traits::{
    ATTR_EXECUTION_ID, ATTR_WORKFLOW_ID, BatchPublishResult, TaskBus, TaskHandler, TaskMessage,
    TaskSubscriber,
};
