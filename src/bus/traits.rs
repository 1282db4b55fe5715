//! The bus abstraction and wire envelope

use async_trait::async_trait;
use std::collections::HashMap;

use super::errors::BusError;
use crate::executor::ExecError;
use crate::model::Task;

pub const ATTR_EXECUTION_ID: &str = "execution_id";
pub const ATTR_WORKFLOW_ID: &str = "workflow_id";

/// Wire envelope: canonical-JSON body plus routing attributes
#[derive(Debug, Clone)]
pub struct TaskMessage {
    pub body: Vec<u8>,
    pub attributes: HashMap<String, String>,
    /// Bus-level delivery attempt, starting at 1
    pub delivery_attempt: u32,
}

impl TaskMessage {
    /// Envelope a task with its routing attributes
    pub fn from_task(task: &Task) -> Result<Self, BusError> {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_EXECUTION_ID.to_string(), task.execution_id.clone());
        attributes.insert(ATTR_WORKFLOW_ID.to_string(), task.workflow_id.clone());
        Ok(Self {
            body: task.encode()?,
            attributes,
            delivery_attempt: 1,
        })
    }

    /// Decode the body back into a task
    pub fn task(&self) -> Result<Task, BusError> {
        Ok(Task::decode(&self.body)?)
    }
}

/// Result of publishing a batch, with best-effort semantics
///
/// Every message in the batch is attempted; individual failures do not stop
/// the rest. The counts report exactly what happened.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchPublishResult {
    pub total: usize,
    pub published: usize,
    pub failed: usize,
}

impl BatchPublishResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.published == self.total && self.failed == 0
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Handler invoked once per delivered task
///
/// `Ok` acks the message; `Err` nacks it, and the bus redelivers with
/// backoff until its delivery-attempt cap moves the message to the DLQ.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<(), ExecError>;
}

/// Publication surface of the task bus
#[async_trait]
pub trait TaskBus: Send + Sync {
    async fn publish_task(&self, task: &Task) -> Result<(), BusError>;

    /// Publish in insertion order; delivery order is not guaranteed
    async fn publish_batch(&self, tasks: &[Task]) -> Result<BatchPublishResult, BusError>;

    async fn publish_to_dlq(&self, task: &Task, reason: &str) -> Result<(), BusError>;
}

/// Consumption surface of the task bus
#[async_trait]
pub trait TaskSubscriber: Send + Sync {
    /// Start the subscription; one active subscription per bus
    async fn subscribe(
        &self,
        config: super::subscriber::SubscriberConfig,
        handler: std::sync::Arc<dyn TaskHandler>,
    ) -> Result<super::subscriber::SubscriptionHandle, BusError>;

    /// Stop intake; the active subscription drains and exits
    fn stop_intake(&self);
}
