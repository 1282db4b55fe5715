//! Full control-plane round trip: seed publication, worker processing,
//! quiescence-driven completion, cancellation

mod common;

use std::sync::Arc;
use std::time::Duration;

use crawlify::bus::{SubscriberConfig, TaskHandler, TaskSubscriber};
use crawlify::model::{ExecutionStatus, WorkflowConfig};
use crawlify::orchestrator::{MemoryProfileStore, Orchestrator, OrchestratorConfig};
use crawlify::store::KvStore;

use common::{
    Harness, extract_title_node, links_node, navigate_node, phase, with_markers,
    with_transition, workflow,
};

fn orchestrator_for(harness: &Harness) -> Orchestrator {
    Orchestrator::new(
        Arc::clone(&harness.bus) as _,
        Arc::clone(&harness.kv) as Arc<dyn KvStore>,
        Arc::new(MemoryProfileStore::new()),
        OrchestratorConfig {
            poll_interval: Duration::from_millis(100),
            quiescence_ticks: 2,
        },
    )
}

#[tokio::test]
async fn execution_completes_when_the_queue_drains() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/list")
        .with_body(r#"<a class="p" href="/p/1">one</a><a class="p" href="/p/2">two</a>"#)
        .create_async()
        .await;
    for n in 1..=2 {
        server
            .mock("GET", format!("/p/{n}").as_str())
            .with_body(format!("<h1>Item {n}</h1>"))
            .create_async()
            .await;
    }

    let harness = Harness::new();
    harness
        .bus
        .subscribe(
            SubscriberConfig {
                max_outstanding: 16,
                parallelism: 4,
                ack_deadline: Duration::from_secs(20),
            },
            Arc::clone(&harness.executor) as Arc<dyn TaskHandler>,
        )
        .await
        .expect("subscribe");

    let orchestrator = orchestrator_for(&harness);
    let wf = workflow(
        &[&format!("{}/list", server.url())],
        vec![
            with_transition(
                phase("list", vec![navigate_node(), links_node(".p", "product")]),
                "detail",
            ),
            with_markers(
                phase("detail", vec![navigate_node(), extract_title_node()]),
                &["product"],
            ),
        ],
        WorkflowConfig { max_depth: 2, ..WorkflowConfig::default() },
    );

    let execution = orchestrator.start_execution(&wf).await.expect("start");
    assert_eq!(execution.status, ExecutionStatus::Running);

    let finished = tokio::time::timeout(
        Duration::from_secs(20),
        orchestrator.monitor_to_completion(&execution.execution_id),
    )
    .await
    .expect("monitor finishes in time")
    .expect("monitor succeeds");

    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.tasks_published, 3, "seed + two product pages");
    assert_eq!(finished.stats.tasks_processed, 3);
    assert_eq!(finished.stats.items_extracted, 2);
    assert_eq!(finished.stats.errors, 0);

    assert_eq!(harness.items.items_for(&finished.execution_id).await.len(), 2);
}

#[tokio::test]
async fn cancelled_execution_drops_pending_tasks() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/page")
        .with_body("<h1>content</h1>")
        .create_async()
        .await;

    let harness = Harness::new();
    let orchestrator = orchestrator_for(&harness);
    let wf = workflow(
        &[&format!("{}/page", server.url())],
        vec![phase("p1", vec![navigate_node(), extract_title_node()])],
        WorkflowConfig::default(),
    );

    // cancel before any worker subscribes, so the seed is still queued
    let execution = orchestrator.start_execution(&wf).await.expect("start");
    orchestrator
        .cancel_execution(&execution.execution_id)
        .await
        .expect("cancel");

    harness
        .bus
        .subscribe(
            SubscriberConfig {
                max_outstanding: 4,
                parallelism: 2,
                ack_deadline: Duration::from_secs(5),
            },
            Arc::clone(&harness.executor) as Arc<dyn TaskHandler>,
        )
        .await
        .expect("subscribe");
    tokio::time::sleep(Duration::from_millis(300)).await;

    // the worker observed the cancellation and did no work
    assert!(harness.items.items_for(&execution.execution_id).await.is_empty());
    let persisted = orchestrator
        .get_execution(&execution.execution_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(persisted.status, ExecutionStatus::Cancelled);
}
