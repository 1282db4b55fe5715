//! End-to-end pipeline scenarios against a local mock server
//!
//! The executor runs with the real static HTTP driver; bus, kv-store and
//! item sink are in-memory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crawlify::bus::{SubscriberConfig, TaskHandler, TaskSubscriber};
use crawlify::model::WorkflowConfig;
use crawlify::stats::ExecutionCounters;

use common::{
    Harness, extract_title_node, links_node, navigate_node, phase, seed_task, with_markers,
    with_transition,
};

fn fast_subscriber() -> SubscriberConfig {
    SubscriberConfig {
        max_outstanding: 16,
        parallelism: 4,
        ack_deadline: Duration::from_secs(20),
    }
}

/// Poll until the execution quiesces or the deadline passes
async fn wait_for_drain(counters: &ExecutionCounters, execution: &str, min_published: u64) {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let totals = counters.totals(execution).await.expect("totals");
        if totals.tasks_published >= min_published && totals.inflight() == 0 {
            // one extra settle period for the last flush
            tokio::time::sleep(Duration::from_millis(100)).await;
            return;
        }
    }
    panic!("execution {execution} did not drain");
}

#[tokio::test]
async fn single_phase_extract_produces_one_item() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/a")
        .with_header("content-type", "text/html")
        .with_body("<html><head><title>t</title></head><body><h1>HELLO</h1></body></html>")
        .create_async()
        .await;

    let harness = Harness::new();
    let url = format!("{}/a", server.url());
    let task = seed_task(
        "exec-single",
        &url,
        vec![phase("p1", vec![navigate_node(), extract_title_node()])],
        WorkflowConfig::default(),
    );

    harness.executor.handle(task.clone()).await.expect("task completes");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let items = harness.items.items_for("exec-single").await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].url, url);
    assert_eq!(items[0].workflow_id, "wf-test");
    assert_eq!(items[0].task_id, task.task_id);
    assert_eq!(items[0].data["title"], "HELLO");
    assert_eq!(items[0].data["_schema"], "post");
}

#[tokio::test]
async fn discovery_phase_routes_marked_children_to_extraction() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/list")
        .with_body(
            r#"<html><body>
                <a class="p" href="/p/1">one</a>
                <a class="p" href="/p/2">two</a>
                <a class="p" href="/p/3">three</a>
                <a class="other" href="/skip">skip</a>
            </body></html>"#,
        )
        .create_async()
        .await;
    for n in 1..=3 {
        server
            .mock("GET", format!("/p/{n}").as_str())
            .with_body(format!("<html><body><h1>Item {n}</h1></body></html>"))
            .create_async()
            .await;
    }

    let harness = Harness::new();
    let phases = vec![
        with_transition(
            phase("list", vec![navigate_node(), links_node(".p", "product")]),
            "detail",
        ),
        with_markers(
            phase("detail", vec![navigate_node(), extract_title_node()]),
            &["product"],
        ),
    ];

    harness
        .bus
        .subscribe(fast_subscriber(), Arc::clone(&harness.executor) as Arc<dyn TaskHandler>)
        .await
        .expect("subscribe");

    let seed = seed_task(
        "exec-disc",
        &format!("{}/list", server.url()),
        phases,
        WorkflowConfig { max_depth: 2, ..WorkflowConfig::default() },
    );
    use crawlify::bus::TaskBus;
    harness.bus.publish_task(&seed).await.expect("publish seed");
    let counters = harness.counters();
    counters.incr_published("exec-disc", 1).await.expect("count seed");

    // seed + 3 marked children
    wait_for_drain(&counters, "exec-disc", 4).await;

    let items = harness.items.items_for("exec-disc").await;
    assert_eq!(items.len(), 3, "each product page yields one item");
    let mut titles: Vec<String> = items
        .iter()
        .map(|i| i.data["title"].as_str().unwrap_or_default().to_string())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Item 1", "Item 2", "Item 3"]);

    let totals = counters.totals("exec-disc").await.expect("totals");
    assert_eq!(totals.tasks_published, 4);
    assert_eq!(totals.tasks_processed, 4);
    assert_eq!(totals.urls_discovered, 3);
    assert_eq!(totals.errors, 0);
}

#[tokio::test]
async fn depth_cap_bounds_the_frontier_exactly() {
    let mut server = mockito::Server::new_async().await;
    // seed -> 2 links -> 4 links -> 8 links that must never be fetched
    server
        .mock("GET", "/d0")
        .with_body(r#"<a class="n" href="/d1/a">a</a><a class="n" href="/d1/b">b</a>"#)
        .create_async()
        .await;
    for leaf in ["a", "b"] {
        server
            .mock("GET", format!("/d1/{leaf}").as_str())
            .with_body(format!(
                r#"<a class="n" href="/d2/{leaf}x">x</a><a class="n" href="/d2/{leaf}y">y</a>"#
            ))
            .create_async()
            .await;
    }
    let mut forbidden = Vec::new();
    for leaf in ["ax", "ay", "bx", "by"] {
        server
            .mock("GET", format!("/d2/{leaf}").as_str())
            .with_body(format!(
                r#"<a class="n" href="/d3/{leaf}1">1</a><a class="n" href="/d3/{leaf}2">2</a>"#
            ))
            .create_async()
            .await;
        for suffix in ["1", "2"] {
            forbidden.push(
                server
                    .mock("GET", format!("/d3/{leaf}{suffix}").as_str())
                    .with_body("too deep")
                    .expect(0)
                    .create_async()
                    .await,
            );
        }
    }

    let harness = Harness::new();
    harness
        .bus
        .subscribe(fast_subscriber(), Arc::clone(&harness.executor) as Arc<dyn TaskHandler>)
        .await
        .expect("subscribe");

    let seed = seed_task(
        "exec-depth",
        &format!("{}/d0", server.url()),
        vec![phase("crawl", vec![navigate_node(), links_node(".n", "")])],
        WorkflowConfig { max_depth: 2, ..WorkflowConfig::default() },
    );
    use crawlify::bus::TaskBus;
    harness.bus.publish_task(&seed).await.expect("publish seed");
    let counters = harness.counters();
    counters.incr_published("exec-depth", 1).await.expect("count seed");

    wait_for_drain(&counters, "exec-depth", 7).await;

    let totals = counters.totals("exec-depth").await.expect("totals");
    assert_eq!(totals.tasks_published, 7, "1 + 2 + 4 tasks, nothing at depth 3");
    assert_eq!(totals.tasks_processed, 7);
    assert_eq!(totals.errors, 0);
    for mock in &forbidden {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn duplicate_delivery_executes_exactly_once() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/dup")
        .with_body("<html><body><h1>ONCE</h1></body></html>")
        .create_async()
        .await;

    let harness = Harness::new();
    let task = seed_task(
        "exec-dup",
        &format!("{}/dup", server.url()),
        vec![phase("p1", vec![navigate_node(), extract_title_node()])],
        WorkflowConfig::default(),
    );

    // two workers receive the same message concurrently
    let left = {
        let executor = Arc::clone(&harness.executor);
        let task = task.clone();
        tokio::spawn(async move { executor.handle(task).await })
    };
    let right = {
        let executor = Arc::clone(&harness.executor);
        let task = task.clone();
        tokio::spawn(async move { executor.handle(task).await })
    };

    left.await.expect("join").expect("left acks");
    right.await.expect("join").expect("right acks");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        harness.items.items_for("exec-dup").await.len(),
        1,
        "only the claim winner extracts"
    );
}
