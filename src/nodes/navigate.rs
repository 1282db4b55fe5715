//! The `navigate` node
//!
//! Optionally switches drivers first (priority: profile > fingerprint name
//! > bare driver name, and only when the target differs from the current
//! driver), then issues a goto with an optional wait-selector.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::time::Duration;

use super::context::{ExecutionContext, SwitchTarget};
use super::registry::NodeExecutor;
use crate::driver::{NavigateOptions, WaitOptions};
use crate::executor::ExecError;
use crate::model::{DriverKind, Node};

#[derive(Debug, Default, Deserialize)]
struct NavigateParams {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    wait_for: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// Driver override for this and subsequent nodes
    #[serde(default)]
    driver: Option<String>,
    #[serde(default)]
    profile_id: Option<String>,
    /// Browser-family fingerprint hint, meaningful with the http driver
    #[serde(default)]
    browser: Option<String>,
}

pub struct NavigateExecutor;

#[async_trait]
impl NodeExecutor for NavigateExecutor {
    fn node_type(&self) -> &'static str {
        "navigate"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: NavigateParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("navigate params: {e}")))?;

        if let Some(target) = switch_target(&params, ctx) {
            debug!("navigate node {} switching driver: {target:?}", node.id);
            ctx.switch_driver(target).await?;
        }

        let url = params.url.clone().unwrap_or_else(|| ctx.task.url.clone());
        let mut opts = NavigateOptions::default();
        if let Some(secs) = params.timeout_secs {
            opts = opts.timeout(Duration::from_secs(secs));
        }
        ctx.page.navigate(&url, opts).await?;

        if let Some(selector) = &params.wait_for {
            let mut wait = WaitOptions::visible();
            if let Some(secs) = params.timeout_secs {
                wait = wait.timeout(Duration::from_secs(secs));
            }
            ctx.page.wait_for_selector(selector, wait).await?;
        }
        Ok(())
    }
}

/// Decide whether and how to switch, honouring the override priority
fn switch_target(params: &NavigateParams, ctx: &ExecutionContext) -> Option<SwitchTarget> {
    let current = ctx.page.driver_kind();

    if let Some(profile_id) = &params.profile_id {
        // a profile always wins; its own driver field decides the variant
        let profile_kind = ctx
            .task
            .metadata
            .node_profiles
            .get(profile_id)
            .map(|p| p.driver);
        if profile_kind != Some(current) {
            return Some(SwitchTarget::Profile(profile_id.clone()));
        }
        return None;
    }

    let declared = params.driver.as_deref().and_then(DriverKind::parse)?;
    if declared == current {
        return None;
    }
    match &params.browser {
        Some(family) => Some(SwitchTarget::Fingerprint {
            driver: declared.as_str().to_string(),
            family: family.clone(),
        }),
        None => Some(SwitchTarget::Name(declared.as_str().to_string())),
    }
}
