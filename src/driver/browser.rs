//! Full-browser driver: owns a headless Chromium process
//!
//! Every task gets its own incognito browser context, so cookies, storage
//! and cache never leak between tasks sharing the process.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::chromium::{apply_stealth, apply_user_agent, launch_browser, ChromiumPage};
use super::error::{DriverError, DriverResult};
use super::options::PageContext;
use super::page::{Driver, DynPage};
use crate::model::DriverKind;

/// Driver over a locally launched headless Chromium
pub struct BrowserDriver {
    browser: Arc<Mutex<Browser>>,
    handler_task: JoinHandle<()>,
    user_data_dir: std::path::PathBuf,
    /// Proxy the process was launched with; per-context proxies are not a
    /// thing in Chromium, so the manager pools one driver per proxy
    proxy_url: Option<String>,
}

impl BrowserDriver {
    /// Launch a browser process, optionally routed through a proxy
    pub async fn launch(
        proxy_url: Option<String>,
        launch_flags: &[String],
    ) -> DriverResult<Self> {
        let user_data_dir =
            std::env::temp_dir().join(format!("crawlify_chrome_{}", Uuid::new_v4()));
        let (browser, handler_task) =
            launch_browser(user_data_dir.clone(), proxy_url.as_deref(), launch_flags).await?;
        debug!(proxy = ?proxy_url, "browser driver launched");
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler_task,
            user_data_dir,
            proxy_url,
        })
    }

    /// Proxy this process routes through, if any
    #[must_use]
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }
}

#[async_trait]
impl Driver for BrowserDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Browser
    }

    async fn new_page(&self, ctx: &PageContext) -> DriverResult<DynPage> {
        if let Some(proxy) = &ctx.proxy
            && self.proxy_url.as_deref() != Some(proxy.url.as_str())
        {
            warn!(
                requested = %proxy.url,
                "page context proxy differs from launch proxy; manager should pool per proxy"
            );
        }

        let (context_id, page) = {
            let mut browser = self.browser.lock().await;
            let context_id = browser
                .create_browser_context(CreateBrowserContextParams::default())
                .await
                .map_err(DriverError::other)?;
            let params = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(|e| DriverError::Other(format!("create target: {e}")))?;
            let page = browser.new_page(params).await.map_err(DriverError::other)?;
            (context_id, page)
        };

        apply_stealth(&page).await?;
        let user_agent = ctx
            .user_agent
            .clone()
            .or_else(|| ctx.fingerprint.map(|f| f.user_agent().to_string()));
        if let Some(ua) = user_agent {
            apply_user_agent(&page, &ua).await?;
        }

        Ok(Box::new(ChromiumPage::new(
            page,
            DriverKind::Browser,
            Some((Arc::clone(&self.browser), context_id)),
        )))
    }

    async fn close(&self) -> DriverResult<()> {
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("browser close failed: {e}");
            }
        }
        self.handler_task.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir)
            && self.user_data_dir.exists()
        {
            warn!(
                "failed to remove user data dir {}: {e}",
                self.user_data_dir.display()
            );
        }
        Ok(())
    }
}
