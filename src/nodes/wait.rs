//! Wait nodes: fixed sleeps and selector waits

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::context::ExecutionContext;
use super::registry::NodeExecutor;
use crate::driver::{WaitOptions, WaitState};
use crate::executor::ExecError;
use crate::model::Node;

/// Plain sleep; `duration_ms` or `seconds`
pub struct WaitExecutor;

#[async_trait]
impl NodeExecutor for WaitExecutor {
    fn node_type(&self) -> &'static str {
        "wait"
    }

    async fn execute(&self, node: &Node, _ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let duration = node
            .param_u64("duration_ms")
            .map(Duration::from_millis)
            .or_else(|| node.param_u64("seconds").map(Duration::from_secs))
            .ok_or_else(|| {
                ExecError::Validation(format!("node {} requires duration_ms or seconds", node.id))
            })?;
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct WaitForParams {
    selector: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// attached | detached | visible | hidden
    #[serde(default)]
    state: Option<String>,
}

/// Wait for an element to reach a readiness state
pub struct WaitForExecutor;

#[async_trait]
impl NodeExecutor for WaitForExecutor {
    fn node_type(&self) -> &'static str {
        "wait_for"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: WaitForParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("wait_for params: {e}")))?;

        let state = match params.state.as_deref() {
            Some("attached") => WaitState::Attached,
            Some("detached") => WaitState::Detached,
            Some("hidden") => WaitState::Hidden,
            _ => WaitState::Visible,
        };

        let mut opts = WaitOptions::default().state(state);
        if let Some(secs) = params.timeout_secs {
            opts = opts.timeout(Duration::from_secs(secs));
        }
        ctx.page
            .wait_for_state(&params.selector, state, opts)
            .await?;
        Ok(())
    }
}
