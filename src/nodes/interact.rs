//! Interaction nodes: click, type, input, hover, scroll, screenshot

use async_trait::async_trait;
use serde::Deserialize;

use super::context::ExecutionContext;
use super::registry::NodeExecutor;
use crate::driver::ScreenshotOptions;
use crate::executor::ExecError;
use crate::model::Node;

fn required_selector(node: &Node) -> Result<String, ExecError> {
    node.param_str("selector")
        .map(str::to_string)
        .ok_or_else(|| {
            ExecError::Validation(format!("node {} requires a selector", node.id))
        })
}

pub struct ClickExecutor;

#[async_trait]
impl NodeExecutor for ClickExecutor {
    fn node_type(&self) -> &'static str {
        "click"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let selector = required_selector(node)?;
        ctx.page.click(&selector).await?;
        Ok(())
    }
}

pub struct TypeExecutor;

#[async_trait]
impl NodeExecutor for TypeExecutor {
    fn node_type(&self) -> &'static str {
        "type"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let selector = required_selector(node)?;
        let text = node.param_str("text").ok_or_else(|| {
            ExecError::Validation(format!("node {} requires text", node.id))
        })?;
        ctx.page.type_text(&selector, text).await?;
        Ok(())
    }
}

/// Clears the target before entering the value
pub struct InputExecutor;

#[async_trait]
impl NodeExecutor for InputExecutor {
    fn node_type(&self) -> &'static str {
        "input"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let selector = required_selector(node)?;
        let value = node
            .param_str("value")
            .or_else(|| node.param_str("text"))
            .ok_or_else(|| ExecError::Validation(format!("node {} requires a value", node.id)))?;
        ctx.page.fill(&selector, value).await?;
        Ok(())
    }
}

pub struct HoverExecutor;

#[async_trait]
impl NodeExecutor for HoverExecutor {
    fn node_type(&self) -> &'static str {
        "hover"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let selector = required_selector(node)?;
        ctx.page.hover(&selector).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScrollParams {
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    pixels: Option<i64>,
    /// `bottom` scrolls to the document end
    #[serde(default)]
    to: Option<String>,
}

pub struct ScrollExecutor;

#[async_trait]
impl NodeExecutor for ScrollExecutor {
    fn node_type(&self) -> &'static str {
        "scroll"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: ScrollParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("scroll params: {e}")))?;

        let script = if let Some(selector) = &params.selector {
            format!(
                "document.querySelector({})?.scrollIntoView({{behavior: 'instant', block: 'center'}})",
                serde_json::to_string(selector).unwrap_or_default()
            )
        } else if params.to.as_deref() == Some("bottom") {
            "window.scrollTo(0, document.body.scrollHeight)".to_string()
        } else {
            format!("window.scrollBy(0, {})", params.pixels.unwrap_or(500))
        };

        ctx.page.evaluate(&script).await?;
        Ok(())
    }
}

pub struct ScreenshotExecutor;

#[async_trait]
impl NodeExecutor for ScreenshotExecutor {
    fn node_type(&self) -> &'static str {
        "screenshot"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let full_page = node.param_bool("full_page").unwrap_or(false);
        let bytes = ctx.page.screenshot(ScreenshotOptions { full_page }).await?;
        ctx.variables.insert(
            format!("screenshot:{}", node.id),
            serde_json::Value::Number(bytes.len().into()),
        );
        ctx.screenshots.push((node.id.clone(), bytes));
        Ok(())
    }
}
