//! In-memory task bus
//!
//! A bounded mpsc channel with at-least-once semantics: handler failure
//! nacks the message, nacked messages are redelivered with exponential
//! backoff, and messages exceeding the delivery-attempt cap land in the
//! dead-letter queue. Shutdown stops intake and lets in-flight handlers
//! drain. Clones share all state, following the broadcast-sender pattern.

use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore, mpsc};

use super::errors::BusError;
use super::metrics::BusMetrics;
use super::subscriber::{SubscriberConfig, SubscriptionHandle, redelivery_delay};
use super::traits::{BatchPublishResult, TaskBus, TaskHandler, TaskMessage, TaskSubscriber};
use crate::model::Task;

/// Tuning for the in-memory bus
#[derive(Debug, Clone)]
pub struct MemoryTaskBusConfig {
    pub capacity: usize,
    /// Deliveries before a message is dead-lettered
    pub max_delivery_attempts: u32,
    pub redelivery_base_delay: Duration,
    pub redelivery_max_delay: Duration,
}

impl Default for MemoryTaskBusConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_delivery_attempts: 5,
            redelivery_base_delay: Duration::from_millis(500),
            redelivery_max_delay: Duration::from_secs(60),
        }
    }
}

struct BusInner {
    tx: mpsc::Sender<TaskMessage>,
    rx: Mutex<Option<mpsc::Receiver<TaskMessage>>>,
    dlq: Mutex<Vec<(TaskMessage, String)>>,
    metrics: BusMetrics,
    shutdown: Notify,
    shutdown_flag: AtomicBool,
    config: MemoryTaskBusConfig,
}

/// Single-topic bus with one subscription and a dead-letter store
#[derive(Clone)]
pub struct MemoryTaskBus {
    inner: Arc<BusInner>,
}

impl MemoryTaskBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_config(MemoryTaskBusConfig { capacity, ..Default::default() })
    }

    #[must_use]
    pub fn with_config(config: MemoryTaskBusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        Self {
            inner: Arc::new(BusInner {
                tx,
                rx: Mutex::new(Some(rx)),
                dlq: Mutex::new(Vec::new()),
                metrics: BusMetrics::new(),
                shutdown: Notify::new(),
                shutdown_flag: AtomicBool::new(false),
                config,
            }),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Stop intake; the active subscription drains and exits
    pub fn shutdown(&self) {
        self.inner.shutdown_flag.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        debug!("task bus shutdown signaled");
    }

    /// Decoded dead-letter contents with their reasons, for inspection
    pub async fn dlq_tasks(&self) -> Vec<(Task, String)> {
        let dlq = self.inner.dlq.lock().await;
        dlq.iter()
            .filter_map(|(message, reason)| {
                message.task().ok().map(|task| (task, reason.clone()))
            })
            .collect()
    }
}

impl BusInner {
    fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    async fn send(&self, message: TaskMessage) -> Result<(), BusError> {
        if self.is_shutdown() {
            return Err(BusError::Shutdown);
        }
        self.tx.send(message).await.map_err(|_| BusError::Shutdown)
    }

    async fn deliver(
        self: &Arc<Self>,
        message: TaskMessage,
        handler: &dyn TaskHandler,
        ack_deadline: Duration,
    ) {
        let task = match message.task() {
            Ok(task) => task,
            Err(e) => {
                // malformed bodies are acked away; retrying cannot fix them
                warn!("dropping undecodable task message: {e}");
                self.metrics.increment_acked();
                return;
            }
        };
        let task_id = task.task_id.clone();

        let outcome = tokio::time::timeout(ack_deadline, handler.handle(task)).await;
        match outcome {
            Ok(Ok(())) => {
                self.metrics.increment_acked();
            }
            Ok(Err(e)) => {
                debug!("handler nacked task {task_id}: {e}");
                self.nack(message, &e.to_string()).await;
            }
            Err(_) => {
                warn!("handler exceeded ack deadline for task {task_id}");
                self.nack(message, "ack deadline exceeded").await;
            }
        }
    }

    async fn nack(self: &Arc<Self>, mut message: TaskMessage, reason: &str) {
        self.metrics.increment_nacked();

        if message.delivery_attempt >= self.config.max_delivery_attempts {
            warn!(
                "message exceeded {} delivery attempts, dead-lettering: {reason}",
                self.config.max_delivery_attempts
            );
            self.metrics.increment_dead_lettered();
            self.dlq.lock().await.push((message, reason.to_string()));
            return;
        }

        message.delivery_attempt += 1;
        let delay = redelivery_delay(
            self.config.redelivery_base_delay,
            self.config.redelivery_max_delay,
            message.delivery_attempt,
        );
        self.metrics.increment_redelivered();

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.is_shutdown() && inner.tx.send(message).await.is_err() {
                warn!("redelivery dropped: bus closed");
            }
        });
    }
}

#[async_trait::async_trait]
impl TaskSubscriber for MemoryTaskBus {
    /// Start the single subscription with the given handler
    ///
    /// The dispatcher pulls messages, bounds un-acked messages by
    /// `max_outstanding` and handler concurrency by `parallelism`, and
    /// nacks any handler that errors or outlives the ack deadline.
    async fn subscribe(
        &self,
        config: SubscriberConfig,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<SubscriptionHandle, BusError> {
        let mut rx = self
            .inner
            .rx
            .lock()
            .await
            .take()
            .ok_or(BusError::AlreadySubscribed)?;

        let inner = Arc::clone(&self.inner);
        let outstanding = Arc::new(Semaphore::new(config.max_outstanding));
        let parallelism = Arc::new(Semaphore::new(config.parallelism));

        let dispatcher = tokio::spawn(async move {
            loop {
                if inner.is_shutdown() {
                    break;
                }
                let outstanding_permit = tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    permit = Arc::clone(&outstanding).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let message = tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    received = rx.recv() => match received {
                        Some(m) => m,
                        None => break,
                    },
                };

                let inner = Arc::clone(&inner);
                let handler = Arc::clone(&handler);
                let parallelism = Arc::clone(&parallelism);
                let ack_deadline = config.ack_deadline;

                tokio::spawn(async move {
                    let _outstanding = outstanding_permit;
                    let Ok(_parallel) = parallelism.acquire_owned().await else {
                        return;
                    };
                    inner.deliver(message, handler.as_ref(), ack_deadline).await;
                });
            }

            // intake stopped; in-flight handlers hold outstanding permits,
            // so reacquiring the full set observes the drain
            debug!("subscription intake stopped, draining in-flight handlers");
            let _ = outstanding
                .acquire_many(config.max_outstanding as u32)
                .await;
            debug!("subscription drained");
        });

        Ok(SubscriptionHandle { dispatcher })
    }

    fn stop_intake(&self) {
        self.shutdown();
    }
}

#[async_trait::async_trait]
impl TaskBus for MemoryTaskBus {
    async fn publish_task(&self, task: &Task) -> Result<(), BusError> {
        let message = TaskMessage::from_task(task)?;
        self.inner.send(message).await?;
        self.inner.metrics.increment_published();
        Ok(())
    }

    async fn publish_batch(&self, tasks: &[Task]) -> Result<BatchPublishResult, BusError> {
        let mut result = BatchPublishResult { total: tasks.len(), ..Default::default() };
        for task in tasks {
            match self.publish_task(task).await {
                Ok(()) => result.published += 1,
                Err(BusError::Shutdown) => return Err(BusError::Shutdown),
                Err(e) => {
                    warn!("batch publish failure for {}: {e}", task.task_id);
                    result.failed += 1;
                }
            }
        }
        Ok(result)
    }

    async fn publish_to_dlq(&self, task: &Task, reason: &str) -> Result<(), BusError> {
        let message = TaskMessage::from_task(task)?;
        self.inner.metrics.increment_dead_lettered();
        self.inner.dlq.lock().await.push((message, reason.to_string()));
        Ok(())
    }
}
