//! DevTools-protocol driver: attaches to an external browser
//!
//! Used when the fleet shares managed browser infrastructure instead of
//! launching Chromium per worker. Pages are plain targets in the remote
//! browser; interactions a raw DOM node cannot perform surface
//! `NotSupported` from the shared chromium page implementation.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::chromium::{apply_user_agent, ChromiumPage};
use super::error::{DriverError, DriverResult};
use super::options::PageContext;
use super::page::{Driver, DynPage};
use crate::model::DriverKind;

/// Driver over a remote DevTools websocket endpoint
pub struct CdpDriver {
    browser: Arc<Mutex<Browser>>,
    handler_task: JoinHandle<()>,
}

impl CdpDriver {
    /// Attach to a running browser's DevTools endpoint
    /// (`ws://host:port/devtools/browser/...`)
    pub async fn connect(ws_url: &str) -> DriverResult<Self> {
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(DriverError::other)?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let message = e.to_string();
                    if message.contains("data did not match any variant") {
                        trace!("suppressed benign CDP deserialization error: {message}");
                    } else {
                        warn!("cdp handler error: {message}");
                    }
                }
            }
        });

        debug!(endpoint = ws_url, "attached to remote browser");
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler_task,
        })
    }
}

#[async_trait]
impl Driver for CdpDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Cdp
    }

    async fn new_page(&self, ctx: &PageContext) -> DriverResult<DynPage> {
        if ctx.proxy.is_some() {
            // the remote browser's egress is fixed at its launch; a per-page
            // proxy cannot be honoured over a bare attachment
            return Err(DriverError::not_supported("per-page proxy over cdp"));
        }

        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(DriverError::other)?
        };

        let user_agent = ctx
            .user_agent
            .clone()
            .or_else(|| ctx.fingerprint.map(|f| f.user_agent().to_string()));
        if let Some(ua) = user_agent {
            apply_user_agent(&page, &ua).await?;
        }

        Ok(Box::new(ChromiumPage::new(page, DriverKind::Cdp, None)))
    }

    async fn close(&self) -> DriverResult<()> {
        // the remote browser outlives the attachment; just stop driving it
        self.handler_task.abort();
        Ok(())
    }
}
