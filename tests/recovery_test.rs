//! Failure-path scenarios: proxy rotation on 429s, dead-lettering with
//! incidents on auth walls

mod common;

use std::sync::Arc;
use std::time::Duration;

use crawlify::bus::{SubscriberConfig, TaskHandler, TaskSubscriber};
use crawlify::model::{IncidentPriority, IncidentStatus, Proxy, Task, WorkflowConfig};
use tokio::sync::Mutex;

use common::{Harness, navigate_node, phase, seed_task};

/// Records every task it receives and acks
struct CaptureHandler {
    seen: Mutex<Vec<Task>>,
}

#[async_trait::async_trait]
impl TaskHandler for CaptureHandler {
    async fn handle(&self, task: Task) -> Result<(), crawlify::executor::ExecError> {
        self.seen.lock().await.push(task);
        Ok(())
    }
}

#[tokio::test]
async fn consecutive_429s_rotate_the_proxy_on_republish() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/throttled")
        .with_status(429)
        .with_body("slow down")
        .create_async()
        .await;

    let harness = Harness::new();
    harness
        .recovery
        .proxies()
        .add_proxy(&Proxy::new("p-old", "http://10.0.0.1:3128"))
        .await
        .expect("add old proxy");
    harness
        .recovery
        .proxies()
        .add_proxy(&Proxy::new("p-new", "http://10.0.0.2:3128"))
        .await
        .expect("add new proxy");

    let mut task = seed_task(
        "exec-429",
        &format!("{}/throttled", server.url()),
        vec![phase("p1", vec![navigate_node()])],
        WorkflowConfig::default(),
    );
    task.proxy_id = Some("p-old".to_string());

    // two failures record into the window without producing a plan
    for _ in 0..2 {
        assert!(harness.executor.handle(task.clone()).await.is_err());
    }
    // the third consecutive failure triggers the proxy-swap rule and the
    // executor republishes instead of nacking
    harness
        .executor
        .handle(task.clone())
        .await
        .expect("republish acks the original");

    // the republished task is sitting on the bus
    let capture = Arc::new(CaptureHandler { seen: Mutex::new(Vec::new()) });
    harness
        .bus
        .subscribe(
            SubscriberConfig {
                max_outstanding: 4,
                parallelism: 1,
                ack_deadline: Duration::from_secs(5),
            },
            Arc::clone(&capture) as Arc<dyn TaskHandler>,
        )
        .await
        .expect("subscribe");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen = capture.seen.lock().await;
    assert_eq!(seen.len(), 1);
    let republished = &seen[0];
    assert_eq!(republished.task_id, task.task_id, "same task, new attempt");
    assert_eq!(republished.retry_count, 1);
    assert_eq!(republished.proxy_id.as_deref(), Some("p-new"));
    assert_ne!(republished.proxy_id, task.proxy_id);

    // the failing proxy's counters moved
    let pool = harness.recovery.proxies().list().await.expect("pool");
    let old = pool.iter().find(|p| p.id == "p-old").expect("old proxy");
    assert_eq!(old.failure_count, 3);
}

#[tokio::test]
async fn auth_wall_dead_letters_once_with_an_incident() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/login")
        .with_status(401)
        .with_body("unauthorized")
        .create_async()
        .await;

    let harness = Harness::new();
    let task = seed_task(
        "exec-auth",
        &format!("{}/login", server.url()),
        vec![phase("p1", vec![navigate_node()])],
        WorkflowConfig::default(),
    );

    // the first two failures are recorded and nacked for bus retry
    assert!(harness.executor.handle(task.clone()).await.is_err());
    assert!(harness.executor.handle(task.clone()).await.is_err());
    // the third triggers the auth rule, which grants no retry
    harness
        .executor
        .handle(task.clone())
        .await
        .expect("dlq path acks");

    let dlq = harness.bus.dlq_tasks().await;
    assert_eq!(dlq.len(), 1, "exactly one dead-letter entry");
    assert_eq!(dlq[0].0.task_id, task.task_id);

    let incidents = harness.incidents.reports().await;
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.task_id, task.task_id);
    assert_eq!(incident.error_pattern, "auth_required");
    assert!(incident.priority >= IncidentPriority::Medium);
    assert_eq!(incident.status, IncidentStatus::Open);

    // a later duplicate delivery does not produce a second DLQ entry
    let _ = harness.executor.handle(task.clone()).await;
    assert_eq!(harness.bus.dlq_tasks().await.len(), 1);
}

#[tokio::test]
async fn retry_cap_dead_letters_transient_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/flaky")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let harness = Harness::new();
    let mut task = seed_task(
        "exec-cap",
        &format!("{}/flaky", server.url()),
        vec![phase("p1", vec![navigate_node()])],
        WorkflowConfig::default(),
    );
    // past the absolute cap even a retry-granting rule cannot extend
    task.retry_count = 6;

    harness
        .executor
        .handle(task.clone())
        .await
        .expect("cap resolution acks");

    let dlq = harness.bus.dlq_tasks().await;
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].0.retry_count, 6);
    assert_eq!(harness.incidents.reports().await.len(), 1);
}
