//! Shared chromiumoxide-backed page implementation
//!
//! Both browser variants produce [`ChromiumPage`]s; they differ in context
//! isolation and in which element interactions surface `NotSupported`. The
//! launch path finds a system Chrome/Chromium before falling back to the
//! managed download.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use super::error::{DriverError, DriverResult};
use super::options::{
    Cookie, NavigateOptions, ScreenshotOptions, WaitOptions, WaitState, WaitUntil,
};
use super::page::{DynElement, Element, Page};
use crate::model::DriverKind;

const DEFAULT_SELECTOR_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Removes the loudest automation tells: the webdriver flag, the missing
/// chrome runtime object and the empty language list.
const STEALTH_INIT_SCRIPT: &str = r"
    Object.defineProperty(navigator, 'webdriver', { get: () => false });
    if (!window.chrome) { window.chrome = { runtime: {} }; }
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
";

/// Find a Chrome/Chromium executable on the system
///
/// `CHROMIUM_PATH` overrides everything; then well-known install paths, then
/// `which` on Unix.
pub async fn find_browser_executable() -> DriverResult<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!("CHROMIUM_PATH points to a missing file: {}", path.display());
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("found browser at {}", path.display());
            return Ok(path);
        }
    }

    for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = Command::new("which").arg(cmd).output()
            && output.status.success()
        {
            let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !found.is_empty() {
                return Ok(PathBuf::from(found));
            }
        }
    }

    Err(DriverError::Other("no Chrome/Chromium executable found".to_string()))
}

/// Download a managed Chromium into a cache directory
pub async fn download_managed_browser() -> DriverResult<PathBuf> {
    let cache_dir = std::env::temp_dir().join("crawlify_chromium");
    std::fs::create_dir_all(&cache_dir).map_err(DriverError::other)?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(DriverError::other)?,
    );
    let revision = fetcher.fetch().await.map_err(DriverError::other)?;
    info!("downloaded Chromium to {}", revision.folder_path.display());
    Ok(revision.executable_path)
}

/// Launch a headless browser and spawn the handler task driving its CDP
/// connection
pub async fn launch_browser(
    user_data_dir: PathBuf,
    proxy_url: Option<&str>,
    extra_args: &[String],
) -> DriverResult<(Browser, JoinHandle<()>)> {
    let chrome_path = match find_browser_executable().await {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    std::fs::create_dir_all(&user_data_dir).map_err(DriverError::other)?;

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1920, 1080)
        .user_data_dir(user_data_dir)
        .chrome_executable(chrome_path)
        .headless_mode(HeadlessMode::default())
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-background-networking")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--mute-audio")
        .arg("--hide-scrollbars");

    if let Some(proxy) = proxy_url {
        config_builder = config_builder.arg(format!("--proxy-server={proxy}"));
    }
    for arg in extra_args {
        config_builder = config_builder.arg(arg.clone());
    }

    let browser_config = config_builder
        .build()
        .map_err(|e| DriverError::Other(format!("browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(DriverError::other)?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // Chrome emits CDP events chromiumoxide does not model;
                // those deserialization misses are not actionable
                if message.contains("data did not match any variant") {
                    trace!("suppressed benign CDP deserialization error: {message}");
                } else {
                    warn!("browser handler error: {message}");
                }
            }
        }
        trace!("browser handler task finished");
    });

    Ok((browser, handler_task))
}

/// Override the page's UA and platform, stripping the headless marker
pub async fn apply_user_agent(
    page: &chromiumoxide::Page,
    user_agent: &str,
) -> DriverResult<()> {
    page.execute(SetUserAgentOverrideParams {
        user_agent: user_agent.replace("Headless", ""),
        accept_language: Some("en-US,en".to_string()),
        platform: None,
        user_agent_metadata: None,
    })
    .await
    .map_err(DriverError::other)?;
    Ok(())
}

/// Install the baseline stealth script on a fresh page
pub async fn apply_stealth(page: &chromiumoxide::Page) -> DriverResult<()> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams {
        source: STEALTH_INIT_SCRIPT.to_string(),
        include_command_line_api: None,
        world_name: None,
        run_immediately: None,
    })
    .await
    .map_err(DriverError::other)?;
    Ok(())
}

/// A chromiumoxide page with optional per-task browser-context ownership
pub struct ChromiumPage {
    page: chromiumoxide::Page,
    variant: DriverKind,
    /// Present when this page owns an isolated context to dispose on close
    context: Option<(Arc<Mutex<Browser>>, BrowserContextId)>,
}

impl ChromiumPage {
    #[must_use]
    pub fn new(
        page: chromiumoxide::Page,
        variant: DriverKind,
        context: Option<(Arc<Mutex<Browser>>, BrowserContextId)>,
    ) -> Self {
        Self { page, variant, context }
    }

    async fn find(&self, selector: &str) -> DriverResult<chromiumoxide::element::Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::element_not_found(selector))
    }

    /// Poll a readiness predicate until it holds or the deadline passes
    async fn poll_until<F, Fut>(
        &self,
        timeout: Duration,
        operation: &'static str,
        mut check: F,
    ) -> DriverResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = DriverResult<bool>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if check().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    operation,
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn selector_state(&self, selector: &str, state: WaitState) -> DriverResult<bool> {
        let script = format!(
            r"(() => {{
                const el = document.querySelector({selector});
                if (!el) return 'absent';
                return el.offsetParent !== null || el === document.documentElement
                    ? 'visible' : 'hidden';
            }})()",
            selector = serde_json::to_string(selector).unwrap_or_default(),
        );
        let observed = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(DriverError::other)?
            .into_value::<String>()
            .unwrap_or_else(|_| "absent".to_string());

        Ok(match state {
            WaitState::Attached => observed != "absent",
            WaitState::Detached => observed == "absent",
            WaitState::Visible => observed == "visible",
            WaitState::Hidden => observed == "hidden" || observed == "absent",
        })
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn navigate(&self, url: &str, opts: NavigateOptions) -> DriverResult<()> {
        let timeout = opts.timeout.unwrap_or(DEFAULT_NAVIGATION_TIMEOUT);
        let milestone = opts.wait_until.unwrap_or_default();

        let goto = async {
            self.page.goto(url).await.map_err(DriverError::other)?;
            // domcontentloaded fires before the load event; goto already
            // resolves on it, so only the later milestones wait further
            if !matches!(milestone, WaitUntil::DomContentLoaded) {
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(DriverError::other)?;
            }
            if matches!(milestone, WaitUntil::NetworkIdle) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok::<(), DriverError>(())
        };

        match tokio::time::timeout(timeout, goto).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout {
                operation: "navigation",
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn content(&self) -> DriverResult<String> {
        self.page.content().await.map_err(DriverError::other)
    }

    async fn title(&self) -> DriverResult<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(DriverError::other)?
            .unwrap_or_default())
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(DriverError::other)?
            .unwrap_or_default())
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let element = self.find(selector).await?;
        element.click().await.map_err(DriverError::other)?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()> {
        let element = self.find(selector).await?;
        element.click().await.map_err(DriverError::other)?;
        element.type_str(text).await.map_err(DriverError::other)?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> DriverResult<()> {
        let element = self.find(selector).await?;
        element
            .call_js_fn(
                "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
                false,
            )
            .await
            .map_err(DriverError::other)?;
        element.click().await.map_err(DriverError::other)?;
        element.type_str(text).await.map_err(DriverError::other)?;
        Ok(())
    }

    async fn hover(&self, selector: &str) -> DriverResult<()> {
        if self.variant == DriverKind::Cdp {
            // raw DOM nodes over a bare DevTools attachment have no input
            // domain bound to them
            return Err(DriverError::not_supported("hover"));
        }
        let element = self.find(selector).await?;
        element
            .scroll_into_view()
            .await
            .map_err(DriverError::other)?;
        element
            .call_js_fn(
                "function() { this.dispatchEvent(new MouseEvent('mouseover', { bubbles: true })); }",
                false,
            )
            .await
            .map_err(DriverError::other)?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, opts: WaitOptions) -> DriverResult<()> {
        let state = opts.state.unwrap_or(WaitState::Visible);
        self.wait_for_state(selector, state, opts).await
    }

    async fn wait_for_url(&self, fragment: &str, opts: WaitOptions) -> DriverResult<()> {
        let timeout = opts.timeout.unwrap_or(DEFAULT_NAVIGATION_TIMEOUT);
        let page = self.page.clone();
        let fragment = fragment.to_string();
        self.poll_until(timeout, "wait_for_url", move || {
            let page = page.clone();
            let fragment = fragment.clone();
            async move {
                let current = page
                    .url()
                    .await
                    .map_err(DriverError::other)?
                    .unwrap_or_default();
                Ok(current.contains(&fragment))
            }
        })
        .await
    }

    async fn wait_for_state(
        &self,
        selector: &str,
        state: WaitState,
        opts: WaitOptions,
    ) -> DriverResult<()> {
        let timeout = opts.timeout.unwrap_or(DEFAULT_SELECTOR_TIMEOUT);
        let result = self
            .poll_until(timeout, "wait_for_selector", || {
                self.selector_state(selector, state)
            })
            .await;
        // a timeout waiting for presence reads better as ElementNotFound
        match result {
            Err(DriverError::Timeout { .. })
                if matches!(state, WaitState::Attached | WaitState::Visible) =>
            {
                Err(DriverError::element_not_found(selector))
            }
            other => other,
        }
    }

    async fn wait_for_function(&self, expression: &str, opts: WaitOptions) -> DriverResult<()> {
        let timeout = opts.timeout.unwrap_or(DEFAULT_SELECTOR_TIMEOUT);
        let script = format!("!!({expression})");
        let page = self.page.clone();
        self.poll_until(timeout, "wait_for_function", move || {
            let page = page.clone();
            let script = script.clone();
            async move {
                let truthy = page
                    .evaluate(script.as_str())
                    .await
                    .map_err(DriverError::other)?
                    .into_value::<bool>()
                    .unwrap_or(false);
                Ok(truthy)
            }
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        let result = self.page.evaluate(script).await.map_err(DriverError::other)?;
        // scripts without a return value evaluate to undefined
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn add_init_script(&self, script: &str) -> DriverResult<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams {
                source: script.to_string(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await
            .map_err(DriverError::other)?;
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<DynElement>> {
        match self.page.find_element(selector).await {
            Ok(element) => Ok(Some(Box::new(ChromiumElement {
                element,
                variant: self.variant,
            }))),
            Err(_) => Ok(None),
        }
    }

    async fn query_selector_all(&self, selector: &str) -> DriverResult<Vec<DynElement>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .unwrap_or_default();
        Ok(elements
            .into_iter()
            .map(|element| {
                Box::new(ChromiumElement { element, variant: self.variant }) as DynElement
            })
            .collect())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await.map_err(DriverError::other)?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: Some(c.expires),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> DriverResult<()> {
        let params: Vec<CookieParam> = cookies
            .into_iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name, c.value);
                if !c.domain.is_empty() {
                    param.domain = Some(c.domain);
                }
                param.path = Some(c.path);
                param.secure = Some(c.secure);
                param.http_only = Some(c.http_only);
                param
            })
            .collect();
        self.page.set_cookies(params).await.map_err(DriverError::other)?;
        Ok(())
    }

    async fn screenshot(&self, opts: ScreenshotOptions) -> DriverResult<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(opts.full_page)
                    .build(),
            )
            .await
            .map_err(DriverError::other)
    }

    async fn close(&self) -> DriverResult<()> {
        if let Err(e) = self.page.clone().close().await {
            warn!("page close failed: {e}");
        }
        if let Some((browser, context_id)) = &self.context {
            let mut browser = browser.lock().await;
            if let Err(e) = browser.dispose_browser_context(context_id.clone()).await {
                warn!("browser context disposal failed: {e}");
            }
        }
        Ok(())
    }

    fn last_status(&self) -> Option<u16> {
        None
    }

    fn driver_kind(&self) -> DriverKind {
        self.variant
    }
}

/// A matched element backed by a CDP remote object
pub struct ChromiumElement {
    element: chromiumoxide::element::Element,
    variant: DriverKind,
}

#[async_trait]
impl Element for ChromiumElement {
    async fn text(&self) -> DriverResult<String> {
        Ok(self
            .element
            .inner_text()
            .await
            .map_err(DriverError::other)?
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    async fn attribute(&self, name: &str) -> DriverResult<Option<String>> {
        self.element.attribute(name).await.map_err(DriverError::other)
    }

    async fn inner_html(&self) -> DriverResult<String> {
        Ok(self
            .element
            .inner_html()
            .await
            .map_err(DriverError::other)?
            .unwrap_or_default())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        if self.variant == DriverKind::Cdp {
            return Err(DriverError::not_supported("element screenshot"));
        }
        self.element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(DriverError::other)
    }

    async fn click(&self) -> DriverResult<()> {
        self.element.click().await.map_err(DriverError::other)?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> DriverResult<()> {
        self.element.click().await.map_err(DriverError::other)?;
        self.element.type_str(text).await.map_err(DriverError::other)?;
        Ok(())
    }

    async fn fill(&self, text: &str) -> DriverResult<()> {
        self.element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(DriverError::other)?;
        self.type_text(text).await
    }

    async fn hover(&self) -> DriverResult<()> {
        if self.variant == DriverKind::Cdp {
            return Err(DriverError::not_supported("element hover"));
        }
        self.element
            .call_js_fn(
                "function() { this.dispatchEvent(new MouseEvent('mouseover', { bubbles: true })); }",
                false,
            )
            .await
            .map_err(DriverError::other)?;
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<DynElement>> {
        match self.element.find_element(selector).await {
            Ok(element) => Ok(Some(Box::new(ChromiumElement {
                element,
                variant: self.variant,
            }))),
            Err(_) => Ok(None),
        }
    }

    async fn query_selector_all(&self, selector: &str) -> DriverResult<Vec<DynElement>> {
        let elements = self
            .element
            .find_elements(selector)
            .await
            .unwrap_or_default();
        Ok(elements
            .into_iter()
            .map(|element| {
                Box::new(ChromiumElement { element, variant: self.variant }) as DynElement
            })
            .collect())
    }
}
