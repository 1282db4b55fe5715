//! Task wire-format round-trips
//!
//! A task decoded from its bus message must be semantically equal to the
//! source: phase snapshot, filters, transitions, params, profiles and
//! routing attributes all preserved.

use crawlify::bus::{ATTR_EXECUTION_ID, ATTR_WORKFLOW_ID, TaskMessage};
use crawlify::model::{
    BrowserFamily, BrowserProfile, DriverKind, Node, Phase, PhaseTransition, PhaseType, Task,
    UrlFilter, WorkflowConfig,
};

fn rich_phase() -> Phase {
    Phase {
        id: "detail".to_string(),
        phase_type: PhaseType::Extraction,
        nodes: vec![
            Node::new(
                "nav",
                "navigate",
                serde_json::json!({"wait_for": ".content", "timeout_secs": 20}),
            ),
            Node::new(
                "ext",
                "extract",
                serde_json::json!({
                    "schema": "product",
                    "fields": {
                        "name": {"selector": "h1"},
                        "specs": {"key_value": {
                            "key_selector": ".spec-k",
                            "value_selector": ".spec-v",
                            "format": "object"
                        }}
                    }
                }),
            ),
        ],
        url_filter: Some(UrlFilter {
            markers: vec!["product".to_string()],
            depth: Some(1),
        }),
        transition: Some(PhaseTransition {
            next_phase: "enrich".to_string(),
            condition: Some("has_items".to_string()),
        }),
    }
}

fn profile() -> BrowserProfile {
    BrowserProfile {
        id: "stealth-1".to_string(),
        driver: DriverKind::Browser,
        browser: BrowserFamily::Firefox,
        user_agent: None,
        screen: Default::default(),
        timezone: Some("Europe/Berlin".to_string()),
        locale: Some("de-DE".to_string()),
        launch_flags: vec!["--lang=de".to_string()],
        proxy: None,
        disable_webrtc: true,
        canvas_noise: true,
    }
}

#[test]
fn bus_message_round_trip_preserves_the_snapshot() {
    let mut task = Task::seed(
        "exec-wire",
        "wf-wire",
        "https://shop.example/p/42",
        rich_phase(),
        WorkflowConfig {
            max_depth: 3,
            rate_limit_delay: 250,
            default_browser_name: Some("firefox".to_string()),
            ..WorkflowConfig::default()
        },
    );
    task.depth = 1;
    task.marker = "product".to_string();
    task.metadata.phases = vec![rich_phase()];
    task.metadata.max_depth = Some(3);
    task.metadata.rate_limit_delay = Some(250);
    task.metadata
        .node_profiles
        .insert("stealth-1".to_string(), profile());
    task.retry_count = 2;
    task.proxy_id = Some("p-7".to_string());
    task.proxy_url = Some("http://10.0.0.7:3128".to_string());

    let message = TaskMessage::from_task(&task).expect("envelope");
    assert_eq!(
        message.attributes.get(ATTR_EXECUTION_ID).map(String::as_str),
        Some("exec-wire")
    );
    assert_eq!(
        message.attributes.get(ATTR_WORKFLOW_ID).map(String::as_str),
        Some("wf-wire")
    );

    let decoded = message.task().expect("decode");
    assert_eq!(decoded.task_id, task.task_id);
    assert_eq!(decoded.depth, 1);
    assert_eq!(decoded.marker, "product");
    assert_eq!(decoded.retry_count, 2);
    assert_eq!(decoded.proxy_id.as_deref(), Some("p-7"));

    // phase snapshot: nodes, params, filter, transition
    assert_eq!(decoded.phase_config.nodes.len(), 2);
    assert_eq!(
        decoded.phase_config.nodes[0].param_u64("timeout_secs"),
        Some(20)
    );
    assert_eq!(
        decoded.phase_config.nodes[1].params["fields"]["specs"]["key_value"]["format"],
        "object"
    );
    let filter = decoded.phase_config.url_filter.as_ref().expect("filter");
    assert_eq!(filter.markers, vec!["product"]);
    assert_eq!(filter.depth, Some(1));
    assert_eq!(
        decoded.phase_config.transition.as_ref().map(|t| t.next_phase.as_str()),
        Some("enrich")
    );

    // workflow config and embedded profiles
    assert_eq!(decoded.workflow_config.max_depth, 3);
    assert_eq!(decoded.workflow_config.rate_limit_delay, 250);
    let embedded = decoded
        .metadata
        .node_profiles
        .get("stealth-1")
        .expect("profile embedded");
    assert_eq!(embedded.driver, DriverKind::Browser);
    assert_eq!(embedded.browser, BrowserFamily::Firefox);
    assert!(embedded.disable_webrtc);

    // filter semantics survive the trip
    assert!(decoded.phase_config.accepts("product", 1));
    assert!(!decoded.phase_config.accepts("category", 1));
    assert!(!decoded.phase_config.accepts("product", 2));
}

#[test]
fn depth_zero_filter_survives_encoding() {
    let mut p = rich_phase();
    p.url_filter = Some(UrlFilter { markers: vec![], depth: Some(0) });
    let task = Task::seed("e", "w", "https://x.example/", p, WorkflowConfig::default());

    let decoded = TaskMessage::from_task(&task)
        .expect("envelope")
        .task()
        .expect("decode");
    let filter = decoded.phase_config.url_filter.as_ref().expect("filter");

    // Some(0) must not collapse into "unset"
    assert_eq!(filter.depth, Some(0));
    assert!(decoded.phase_config.accepts("", 0));
    assert!(!decoded.phase_config.accepts("", 1));
}
