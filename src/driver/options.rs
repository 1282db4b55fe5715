//! Option structs shared across driver variants
//!
//! Built with chainable constructors; each driver maps them onto its
//! underlying semantics and ignores the ones that do not apply.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{BrowserFamily, ProxyConfig};

/// Element readiness states for waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitState {
    /// Present in the DOM
    Attached,
    /// Absent from the DOM
    Detached,
    /// Present and rendered
    #[default]
    Visible,
    /// Present but not rendered
    Hidden,
}

/// Navigation completion milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Options for `Page::navigate`
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    pub timeout: Option<Duration>,
    pub wait_until: Option<WaitUntil>,
}

impl NavigateOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn wait_until(mut self, milestone: WaitUntil) -> Self {
        self.wait_until = Some(milestone);
        self
    }
}

/// Options for the `wait_for_*` family
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub state: Option<WaitState>,
}

impl WaitOptions {
    #[must_use]
    pub fn visible() -> Self {
        Self { timeout: None, state: Some(WaitState::Visible) }
    }

    #[must_use]
    pub fn attached() -> Self {
        Self { timeout: None, state: Some(WaitState::Attached) }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn state(mut self, state: WaitState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Options for screenshots
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenshotOptions {
    pub full_page: bool,
}

/// Browser cookie in driver-neutral form
///
/// Cookies cross driver boundaries on a switch, so both browser variants
/// and the HTTP variant read and write this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            expires: None,
        }
    }
}

/// Per-page context passed to a driver factory
///
/// Carries the optional proxy and the TLS-fingerprint hint. The static HTTP
/// variant uses the hint to select its ClientHello-visible identity (headers
/// and User-Agent); browser variants use it only when no explicit
/// user-agent override is present.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub proxy: Option<ProxyConfig>,
    pub fingerprint: Option<BrowserFamily>,
    pub user_agent: Option<String>,
}

impl PageContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_fingerprint(mut self, family: BrowserFamily) -> Self {
        self.fingerprint = Some(family);
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}
