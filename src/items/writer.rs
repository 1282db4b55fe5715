//! Background batching writer
//!
//! Consumes items over a bounded channel, groups them per execution and
//! flushes when either the batch size or the flush interval is reached.
//! Sink failures are logged and counted but never propagate back into the
//! task path. Closing the writer forces a final flush.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::sink::ItemSink;
use crate::model::ExecutedItem;

/// Batching and backpressure tuning
#[derive(Debug, Clone)]
pub struct ItemWriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    /// How long a write may wait on a full queue before being dropped
    pub enqueue_timeout: Duration,
}

impl Default for ItemWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 10_000,
            enqueue_timeout: Duration::from_secs(2),
        }
    }
}

/// Handle to the background writer
pub struct ItemWriter {
    tx: parking_lot::Mutex<Option<mpsc::Sender<ExecutedItem>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
    flush_failures: Arc<AtomicU64>,
    enqueue_timeout: Duration,
}

impl ItemWriter {
    /// Start the background batcher over the given sink
    #[must_use]
    pub fn spawn(sink: Arc<dyn ItemSink>, config: ItemWriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let flush_failures = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(run_batcher(
            rx,
            sink,
            config.batch_size,
            config.flush_interval,
            Arc::clone(&flush_failures),
        ));
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicU64::new(0)),
            flush_failures,
            enqueue_timeout: config.enqueue_timeout,
        }
    }

    /// Enqueue an item; drops (with a count) rather than blocking forever
    pub async fn write(&self, item: ExecutedItem) {
        let Some(tx) = self.tx.lock().clone() else {
            warn!("item writer closed, dropping item");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match tokio::time::timeout(self.enqueue_timeout, tx.send(item)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!("item writer closed, dropping item");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                warn!("item queue full past enqueue timeout, dropping item");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn flush_failure_count(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Stop intake and flush whatever is buffered; idempotent
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!("item writer worker join failed: {e}");
        }
    }
}

async fn run_batcher(
    mut rx: mpsc::Receiver<ExecutedItem>,
    sink: Arc<dyn ItemSink>,
    batch_size: usize,
    flush_interval: Duration,
    flush_failures: Arc<AtomicU64>,
) {
    let mut buffer: HashMap<String, Vec<ExecutedItem>> = HashMap::new();
    let mut buffered = 0usize;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(item) => {
                    buffer.entry(item.execution_id.clone()).or_default().push(item);
                    buffered += 1;
                    if buffered >= batch_size {
                        flush(&sink, &mut buffer, &mut buffered, &flush_failures).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if buffered > 0 {
                    flush(&sink, &mut buffer, &mut buffered, &flush_failures).await;
                }
            }
        }
    }

    // final flush on close
    if buffered > 0 {
        flush(&sink, &mut buffer, &mut buffered, &flush_failures).await;
    }
    debug!("item writer drained");
}

async fn flush(
    sink: &Arc<dyn ItemSink>,
    buffer: &mut HashMap<String, Vec<ExecutedItem>>,
    buffered: &mut usize,
    flush_failures: &Arc<AtomicU64>,
) {
    for (execution_id, items) in buffer.drain() {
        let count = items.len();
        if let Err(e) = sink.write_batch(&execution_id, items).await {
            warn!("item flush failed for execution {execution_id} ({count} items): {e}");
            flush_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("flushed {count} items for execution {execution_id}");
        }
    }
    *buffered = 0;
}
