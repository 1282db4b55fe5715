//! Cookie hand-off across a driver switch

mod common;

use std::sync::Arc;

use crawlify::driver::{
    Driver, DriverManager, DriverManagerConfig, NavigateOptions, PageContext, StaticHttpDriver,
};
use crawlify::executor::task_executor::TaskSwitcher;
use crawlify::model::{DriverKind, WorkflowConfig};
use crawlify::nodes::{DriverSwitcher, ExecutionContext, SwitchTarget};

use common::{navigate_node, phase, seed_task};

#[tokio::test]
async fn switch_preserves_cookies_across_the_boundary() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth")
        .with_header("set-cookie", "session=abc123; Path=/")
        .with_header("set-cookie", "region=eu; Path=/")
        .with_body("<html><body>ok</body></html>")
        .create_async()
        .await;

    let task = seed_task(
        "exec-switch",
        &format!("{}/auth", server.url()),
        vec![phase("p1", vec![navigate_node()])],
        WorkflowConfig::default(),
    );

    // first page picks up the session cookies
    let http = StaticHttpDriver::new();
    let page = http.new_page(&PageContext::new()).await.expect("page");
    page.navigate(&task.url, NavigateOptions::default())
        .await
        .expect("navigate");
    let mut before = page.cookies().await.expect("cookies");
    before.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(before.len(), 2);

    // switch onto a fresh driver of the same capability surface
    let drivers = Arc::new(DriverManager::new(DriverManagerConfig {
        default_driver: DriverKind::Http,
        ..DriverManagerConfig::default()
    }));
    let switcher = Arc::new(TaskSwitcher::new(drivers));
    let mut ctx = ExecutionContext::new(page, task)
        .with_switcher(Arc::clone(&switcher) as Arc<dyn DriverSwitcher>);

    ctx.switch_driver(SwitchTarget::Name("http".to_string()))
        .await
        .expect("switch");

    let mut after = ctx.page.cookies().await.expect("cookies after switch");
    after.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(after, before, "cookies survive the driver boundary");

    switcher.teardown().await;
}
