//! Per-task execution context
//!
//! Scratch space shared by every node in a phase: the live page, the task,
//! free-form variables, accumulated items and discovered URLs, the branch
//! queue, and the driver-switch capability. A switch hands cookies across
//! the driver boundary and leaves teardown bookkeeping to the switcher.

use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::driver::DynPage;
use crate::executor::ExecError;
use crate::model::{Node, Task};

/// A URL found by a discovery node, optionally tagged for routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrl {
    pub url: String,
    pub marker: Option<String>,
}

/// What a switch targets, in node-parameter terms
#[derive(Debug, Clone)]
pub enum SwitchTarget {
    /// Bare driver name (`browser`, `cdp`, `http`)
    Name(String),
    /// Embedded profile ID; the profile decides driver and identity
    Profile(String),
    /// Driver name plus a browser-family fingerprint hint
    Fingerprint { driver: String, family: String },
}

/// Capability for opening pages on other drivers mid-task
///
/// Implementations track any driver created purely for a switch so the
/// task executor can tear it down at task end.
#[async_trait]
pub trait DriverSwitcher: Send + Sync {
    async fn open_page(&self, task: &Task, target: &SwitchTarget) -> Result<DynPage, ExecError>;
}

/// Mutable state threaded through a phase's node sequence
pub struct ExecutionContext {
    pub page: DynPage,
    pub task: Task,
    pub variables: HashMap<String, serde_json::Value>,
    pub extracted_items: Vec<serde_json::Value>,
    pub discovered_urls: Vec<DiscoveredUrl>,
    /// Raw screenshots taken by nodes, keyed by node ID
    pub screenshots: Vec<(String, Vec<u8>)>,
    pub branch_queue: VecDeque<Node>,
    pub errors: Vec<ExecError>,
    switcher: Option<Arc<dyn DriverSwitcher>>,
    cancel: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(page: DynPage, task: Task) -> Self {
        Self {
            page,
            task,
            variables: HashMap::new(),
            extracted_items: Vec::new(),
            discovered_urls: Vec::new(),
            screenshots: Vec::new(),
            branch_queue: VecDeque::new(),
            errors: Vec::new(),
            switcher: None,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_switcher(mut self, switcher: Arc<dyn DriverSwitcher>) -> Self {
        self.switcher = Some(switcher);
        self
    }

    /// Install a cancellation probe checked between nodes
    #[must_use]
    pub fn with_cancel_check(mut self, cancel: Arc<dyn Fn() -> bool + Send + Sync>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Whether the surrounding execution was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|probe| probe())
    }

    /// Record a URL for requeueing, skipping exact repeats within the task
    pub fn discover(&mut self, url: impl Into<String>, marker: Option<String>) {
        let discovered = DiscoveredUrl { url: url.into(), marker };
        if !self.discovered_urls.contains(&discovered) {
            self.discovered_urls.push(discovered);
        }
    }

    /// Replace the current page with one from another driver
    ///
    /// Cookies are read from the old page, the old page is closed, and the
    /// cookies are installed on the new one, so sessions survive the
    /// boundary.
    pub async fn switch_driver(&mut self, target: SwitchTarget) -> Result<(), ExecError> {
        let switcher = self
            .switcher
            .as_ref()
            .ok_or_else(|| {
                ExecError::Validation("driver switch requested but none available".to_string())
            })?
            .clone();

        // a variant that cannot express cookies just hands over none
        let cookies = self.page.cookies().await.unwrap_or_default();
        if let Err(e) = self.page.close().await {
            debug!("closing page before switch failed: {e}");
        }

        let new_page = switcher.open_page(&self.task, &target).await?;
        if !cookies.is_empty()
            && let Err(e) = new_page.set_cookies(cookies).await
        {
            debug!("cookie install after switch failed: {e}");
        }

        self.page = new_page;
        Ok(())
    }

    /// Reduce recorded node errors to the task-level error, if any
    #[must_use]
    pub fn worst_error(&self) -> Option<&ExecError> {
        self.errors.iter().max_by_key(|e| e.severity())
    }
}
