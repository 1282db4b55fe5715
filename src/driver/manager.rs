//! Driver lifecycle management for a worker
//!
//! Default drivers are pooled and shared across tasks; profile-backed
//! drivers are created fresh per task and closed when the task returns.
//! Browser processes cannot change proxy after launch, so the pool is keyed
//! by (variant, proxy).

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::browser::BrowserDriver;
use super::cdp::CdpDriver;
use super::error::{DriverError, DriverResult};
use super::http::StaticHttpDriver;
use super::options::PageContext;
use super::page::Driver;
use crate::model::{BrowserProfile, DriverKind};

/// Pool configuration for a worker's drivers
#[derive(Debug, Clone)]
pub struct DriverManagerConfig {
    pub default_driver: DriverKind,
    /// DevTools endpoint for the cdp variant
    pub cdp_endpoint: Option<String>,
    /// Extra Chromium launch flags applied to every launched browser
    pub launch_flags: Vec<String>,
    /// Pooled browsers idle longer than this are closed by `reap_idle`
    pub idle_timeout: Duration,
}

impl Default for DriverManagerConfig {
    fn default() -> Self {
        Self {
            default_driver: DriverKind::Http,
            cdp_endpoint: None,
            launch_flags: Vec::new(),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// A resolved driver plus the obligation to close it
///
/// Pooled drivers are shared and survive the task; owned drivers (created
/// for a profile or a switch) must be closed when the task returns, which
/// [`DriverHandle::release`] does.
pub struct DriverHandle {
    driver: Arc<dyn Driver>,
    owned: bool,
}

impl DriverHandle {
    #[must_use]
    pub fn pooled(driver: Arc<dyn Driver>) -> Self {
        Self { driver, owned: false }
    }

    #[must_use]
    pub fn owned(driver: Arc<dyn Driver>) -> Self {
        Self { driver, owned: true }
    }

    #[must_use]
    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Close the backend if this handle owns it
    pub async fn release(self) {
        if self.owned
            && let Err(e) = self.driver.close().await
        {
            warn!("owned driver close failed: {e}");
        }
    }
}

#[derive(Clone)]
struct PooledDriver {
    driver: Arc<dyn Driver>,
    last_used: Instant,
}

/// Creates, pools and retires drivers for one worker process
pub struct DriverManager {
    config: DriverManagerConfig,
    pooled: DashMap<(DriverKind, Option<String>), PooledDriver>,
}

impl DriverManager {
    #[must_use]
    pub fn new(config: DriverManagerConfig) -> Self {
        Self { config, pooled: DashMap::new() }
    }

    #[must_use]
    pub fn default_driver(&self) -> DriverKind {
        self.config.default_driver
    }

    /// Seed the pool with an externally constructed driver
    ///
    /// Later `acquire` calls for the same (variant, proxy) return this
    /// instance instead of creating one.
    pub fn register_pooled(
        &self,
        kind: DriverKind,
        proxy_url: Option<String>,
        driver: Arc<dyn Driver>,
    ) {
        let key = match kind {
            DriverKind::Http => (kind, None),
            _ => (kind, proxy_url),
        };
        self.pooled
            .insert(key, PooledDriver { driver, last_used: Instant::now() });
    }

    /// Shared driver for the given variant and proxy, creating it on first use
    pub async fn acquire(
        &self,
        kind: DriverKind,
        proxy_url: Option<&str>,
    ) -> DriverResult<DriverHandle> {
        // the static driver applies proxies per page, so one instance serves
        // every proxy
        let key = match kind {
            DriverKind::Http => (kind, None),
            _ => (kind, proxy_url.map(str::to_string)),
        };

        if let Some(mut entry) = self.pooled.get_mut(&key) {
            entry.last_used = Instant::now();
            return Ok(DriverHandle::pooled(Arc::clone(&entry.driver)));
        }

        let driver = self.create(kind, proxy_url).await?;
        self.pooled.insert(
            key,
            PooledDriver { driver: Arc::clone(&driver), last_used: Instant::now() },
        );
        Ok(DriverHandle::pooled(driver))
    }

    /// Fresh driver for a browser profile; the caller owns its lifetime
    pub async fn create_for_profile(&self, profile: &BrowserProfile) -> DriverResult<DriverHandle> {
        debug!(profile = %profile.id, driver = profile.driver.as_str(), "creating profile driver");
        let proxy_url = profile.proxy.as_ref().map(|p| p.url.clone());
        let mut launch_flags = self.config.launch_flags.clone();
        launch_flags.extend(profile.launch_flags.iter().cloned());

        let driver: Arc<dyn Driver> = match profile.driver {
            DriverKind::Browser => {
                Arc::new(BrowserDriver::launch(proxy_url, &launch_flags).await?)
            }
            DriverKind::Cdp => Arc::new(self.connect_cdp().await?),
            DriverKind::Http => Arc::new(StaticHttpDriver::new()),
        };
        Ok(DriverHandle::owned(driver))
    }

    /// Page context carrying a profile's proxy and identity
    #[must_use]
    pub fn profile_context(profile: &BrowserProfile) -> PageContext {
        let mut ctx = PageContext::new().with_fingerprint(profile.browser);
        if let Some(proxy) = &profile.proxy {
            ctx = ctx.with_proxy(proxy.clone());
        }
        if let Some(ua) = &profile.user_agent {
            ctx = ctx.with_user_agent(ua.clone());
        }
        ctx
    }

    /// Close pooled drivers idle past the configured timeout
    pub async fn reap_idle(&self) {
        let timeout = self.config.idle_timeout;
        let stale: Vec<(DriverKind, Option<String>)> = self
            .pooled
            .iter()
            .filter(|entry| entry.value().last_used.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for key in stale {
            if let Some((_, pooled)) = self.pooled.remove(&key) {
                info!(driver = key.0.as_str(), "reaping idle pooled driver");
                if let Err(e) = pooled.driver.close().await {
                    warn!("idle driver close failed: {e}");
                }
            }
        }
    }

    /// Close every pooled driver; called during worker shutdown
    pub async fn close_all(&self) {
        let keys: Vec<(DriverKind, Option<String>)> =
            self.pooled.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, pooled)) = self.pooled.remove(&key) {
                if let Err(e) = pooled.driver.close().await {
                    warn!("driver close failed during shutdown: {e}");
                }
            }
        }
    }

    async fn create(
        &self,
        kind: DriverKind,
        proxy_url: Option<&str>,
    ) -> DriverResult<Arc<dyn Driver>> {
        match kind {
            DriverKind::Http => Ok(Arc::new(StaticHttpDriver::new())),
            DriverKind::Browser => Ok(Arc::new(
                BrowserDriver::launch(proxy_url.map(str::to_string), &self.config.launch_flags)
                    .await?,
            )),
            DriverKind::Cdp => Ok(Arc::new(self.connect_cdp().await?)),
        }
    }

    async fn connect_cdp(&self) -> DriverResult<CdpDriver> {
        let endpoint = self
            .config
            .cdp_endpoint
            .as_deref()
            .ok_or_else(|| DriverError::Other("no cdp endpoint configured".to_string()))?;
        CdpDriver::connect(endpoint).await
    }
}
