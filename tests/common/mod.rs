//! Shared harness for end-to-end tests
//!
//! Everything runs against in-memory fakes except the page layer, which
//! uses the real static HTTP driver against a local mock server.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crawlify::bus::{MemoryTaskBus, MemoryTaskBusConfig};
use crawlify::driver::{DriverManager, DriverManagerConfig};
use crawlify::executor::{RetryPolicy, TaskExecutor, TaskExecutorConfig};
use crawlify::items::{ItemWriter, ItemWriterConfig, MemoryItemSink};
use crawlify::model::{
    DriverKind, Node, Phase, PhaseTransition, PhaseType, Task, UrlFilter, Workflow,
    WorkflowConfig,
};
use crawlify::nodes::NodeRegistry;
use crawlify::recovery::incidents::MemoryIncidentStore;
use crawlify::recovery::{
    IncidentReporter, RecoveryConfig, RecoveryManager, RuleEngine,
};
use crawlify::stats::{ExecutionCounters, KvStatsSink, StatsReporter, StatsReporterConfig};
use crawlify::store::{Deduplicator, KvStore, MemoryKvStore};

pub struct Harness {
    pub kv: Arc<MemoryKvStore>,
    pub bus: Arc<MemoryTaskBus>,
    pub items: Arc<MemoryItemSink>,
    pub incidents: Arc<MemoryIncidentStore>,
    pub recovery: Arc<RecoveryManager>,
    pub executor: Arc<TaskExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        let kv = Arc::new(MemoryKvStore::new());
        let kv_dyn: Arc<dyn KvStore> = Arc::clone(&kv) as Arc<dyn KvStore>;
        let bus = Arc::new(MemoryTaskBus::with_config(MemoryTaskBusConfig {
            capacity: 1024,
            max_delivery_attempts: 8,
            redelivery_base_delay: Duration::from_millis(10),
            redelivery_max_delay: Duration::from_millis(50),
        }));
        let items = Arc::new(MemoryItemSink::new());
        let incidents = Arc::new(MemoryIncidentStore::new());

        let recovery = Arc::new(RecoveryManager::new(
            Arc::clone(&kv_dyn),
            RuleEngine::with_defaults(),
            IncidentReporter::new(Arc::clone(&incidents) as _),
            RecoveryConfig {
                max_retries: 3,
                default_retry_delay: Duration::from_millis(10),
                ..RecoveryConfig::default()
            },
        ));

        let drivers = Arc::new(DriverManager::new(DriverManagerConfig {
            default_driver: DriverKind::Http,
            ..DriverManagerConfig::default()
        }));

        let stats = Arc::new(StatsReporter::spawn(
            Arc::new(KvStatsSink::new(Arc::clone(&kv_dyn))),
            StatsReporterConfig { flush_interval: Duration::from_millis(25) },
        ));
        let writer = Arc::new(ItemWriter::spawn(
            Arc::clone(&items) as _,
            ItemWriterConfig {
                batch_size: 4,
                flush_interval: Duration::from_millis(25),
                ..ItemWriterConfig::default()
            },
        ));

        let executor = Arc::new(TaskExecutor::new(
            NodeRegistry::with_builtins(),
            drivers,
            Arc::clone(&bus) as _,
            Arc::new(Deduplicator::new(Arc::clone(&kv_dyn))),
            writer,
            stats,
            Arc::clone(&recovery),
            Arc::new(ExecutionCounters::new(Arc::clone(&kv_dyn))),
            kv_dyn,
            TaskExecutorConfig {
                retry_policy: RetryPolicy {
                    initial_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(20),
                    ..RetryPolicy::default()
                },
                task_timeout: Duration::from_secs(30),
                ..TaskExecutorConfig::default()
            },
        ));

        Self { kv, bus, items, incidents, recovery, executor }
    }

    pub fn counters(&self) -> ExecutionCounters {
        ExecutionCounters::new(Arc::clone(&self.kv) as Arc<dyn KvStore>)
    }
}

pub fn phase(id: &str, nodes: Vec<Node>) -> Phase {
    Phase {
        id: id.to_string(),
        phase_type: PhaseType::Discovery,
        nodes,
        url_filter: None,
        transition: None,
    }
}

pub fn with_transition(mut p: Phase, next: &str) -> Phase {
    p.transition = Some(PhaseTransition { next_phase: next.to_string(), condition: None });
    p
}

pub fn with_markers(mut p: Phase, markers: &[&str]) -> Phase {
    p.url_filter = Some(UrlFilter {
        markers: markers.iter().map(|m| (*m).to_string()).collect(),
        depth: None,
    });
    p
}

pub fn navigate_node() -> Node {
    Node::new("nav", "navigate", serde_json::json!({}))
}

pub fn extract_title_node() -> Node {
    Node::new(
        "ext",
        "extract",
        serde_json::json!({
            "schema": "post",
            "fields": { "title": { "selector": "h1", "type": "text" } }
        }),
    )
}

pub fn links_node(selector: &str, marker: &str) -> Node {
    Node::new(
        "links",
        "extract_links",
        serde_json::json!({ "selector": selector, "marker": marker }),
    )
}

/// Workflow with all phases embedded into seed-task metadata, the way the
/// orchestrator publishes them
pub fn seed_task(
    execution: &str,
    url: &str,
    phases: Vec<Phase>,
    config: WorkflowConfig,
) -> Task {
    let first = phases.first().cloned().expect("at least one phase");
    let mut task = Task::seed(execution, "wf-test", url, first, config);
    task.metadata.phases = phases;
    task
}

/// Workflow record matching `seed_task`'s shape, for orchestrator tests
#[allow(dead_code)]
pub fn workflow(seeds: &[&str], phases: Vec<Phase>, config: WorkflowConfig) -> Workflow {
    Workflow {
        id: "wf-test".to_string(),
        name: "test workflow".to_string(),
        phases,
        config,
        version: 1,
        seed_urls: seeds.iter().map(|s| (*s).to_string()).collect(),
    }
}
