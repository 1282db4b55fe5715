//! The `script` node: arbitrary JS against the current page

use async_trait::async_trait;
use serde::Deserialize;

use super::context::ExecutionContext;
use super::registry::NodeExecutor;
use crate::executor::ExecError;
use crate::model::Node;

#[derive(Debug, Deserialize)]
struct ScriptParams {
    code: String,
    /// Variable name the result lands under; the node ID otherwise
    #[serde(default)]
    store_as: Option<String>,
}

pub struct ScriptExecutor;

#[async_trait]
impl NodeExecutor for ScriptExecutor {
    fn node_type(&self) -> &'static str {
        "script"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: ScriptParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("script params: {e}")))?;

        let result = ctx.page.evaluate(&params.code).await?;
        let key = params.store_as.unwrap_or_else(|| node.id.clone());
        ctx.variables.insert(key, result);
        Ok(())
    }
}
