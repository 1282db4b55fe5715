//! Control-flow nodes: `conditional` and `loop`
//!
//! A conditional evaluates its condition against the page and appends the
//! matching branch's child nodes to the context's branch queue, where the
//! phase runner drains them before the next top-level node. A loop runs its
//! children once per matched element, exposing `loop_index` and
//! `loop_element` through the variable map.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::sync::Weak;

use super::context::ExecutionContext;
use super::registry::{NodeExecutor, NodeRegistry, run_node};
use crate::executor::{ExecError, RetryPolicy};
use crate::model::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Condition {
    Exists,
    NotExists,
    Visible,
    Contains,
    Equals,
    Matches,
    CountGt,
    CountLt,
}

#[derive(Debug, Deserialize)]
struct ConditionalParams {
    condition: Condition,
    #[serde(default)]
    selector: Option<String>,
    /// Comparison operand for contains/equals/matches/count_*
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default, alias = "then_nodes")]
    then: Vec<Node>,
    #[serde(default, alias = "else_nodes", rename = "else")]
    otherwise: Vec<Node>,
}

pub struct ConditionalExecutor;

#[async_trait]
impl NodeExecutor for ConditionalExecutor {
    fn node_type(&self) -> &'static str {
        "conditional"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: ConditionalParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("conditional params: {e}")))?;

        let matched = evaluate_condition(ctx, &params).await?;
        debug!("conditional {}: condition {:?} -> {matched}", node.id, params.condition);

        let branch = if matched { &params.then } else { &params.otherwise };
        for child in branch {
            ctx.branch_queue.push_back(child.clone());
        }
        Ok(())
    }
}

async fn evaluate_condition(
    ctx: &ExecutionContext,
    params: &ConditionalParams,
) -> Result<bool, ExecError> {
    let selector = params.selector.as_deref().ok_or_else(|| {
        ExecError::Validation("conditional requires a selector".to_string())
    })?;

    match params.condition {
        Condition::Exists => Ok(ctx.page.query_selector(selector).await?.is_some()),
        Condition::NotExists => Ok(ctx.page.query_selector(selector).await?.is_none()),
        Condition::Visible => {
            // a variant without rendering treats presence as visibility
            Ok(ctx.page.query_selector(selector).await?.is_some())
        }
        Condition::Contains => {
            let needle = expect_string(params)?;
            match ctx.page.query_selector(selector).await? {
                Some(element) => Ok(element.text().await?.contains(&needle)),
                None => Ok(false),
            }
        }
        Condition::Equals => {
            let expected = expect_string(params)?;
            match ctx.page.query_selector(selector).await? {
                Some(element) => Ok(element.text().await?.trim() == expected),
                None => Ok(false),
            }
        }
        Condition::Matches => {
            let pattern = expect_string(params)?;
            let re = regex::Regex::new(&pattern)
                .map_err(|e| ExecError::Validation(format!("bad matches pattern: {e}")))?;
            match ctx.page.query_selector(selector).await? {
                Some(element) => Ok(re.is_match(&element.text().await?)),
                None => Ok(false),
            }
        }
        Condition::CountGt | Condition::CountLt => {
            let bound = params
                .value
                .as_ref()
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| {
                    ExecError::Validation("count condition requires a numeric value".to_string())
                })? as usize;
            let count = ctx.page.query_selector_all(selector).await?.len();
            Ok(match params.condition {
                Condition::CountGt => count > bound,
                _ => count < bound,
            })
        }
    }
}

fn expect_string(params: &ConditionalParams) -> Result<String, ExecError> {
    params
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ExecError::Validation("condition requires a string value".to_string()))
}

#[derive(Debug, Deserialize)]
struct LoopParams {
    selector: String,
    #[serde(default, alias = "children")]
    nodes: Vec<Node>,
    #[serde(default = "default_max_iterations")]
    max_iterations: usize,
}

fn default_max_iterations() -> usize {
    50
}

pub struct LoopExecutor {
    registry: Weak<NodeRegistry>,
}

impl LoopExecutor {
    #[must_use]
    pub fn new(registry: Weak<NodeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeExecutor for LoopExecutor {
    fn node_type(&self) -> &'static str {
        "loop"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: LoopParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("loop params: {e}")))?;
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| ExecError::Fatal("node registry dropped".to_string()))?;

        // snapshot the matched elements' text up front; children observe
        // the iteration through loop_index / loop_element
        let elements = ctx.page.query_selector_all(&params.selector).await?;
        let mut element_texts = Vec::with_capacity(elements.len());
        for element in elements.iter().take(params.max_iterations) {
            element_texts.push(element.text().await.unwrap_or_default());
        }

        for (index, element_text) in element_texts.into_iter().enumerate() {
            ctx.variables
                .insert("loop_index".to_string(), serde_json::json!(index));
            ctx.variables
                .insert("loop_element".to_string(), serde_json::json!(element_text));

            for child in &params.nodes {
                if let Err(e) = run_node(&registry, ctx, child, RetryPolicy::default()).await {
                    debug!("loop {} child {} failed at index {index}: {e}", node.id, child.id);
                    ctx.errors.push(e);
                }
            }
        }

        ctx.variables.remove("loop_index");
        ctx.variables.remove("loop_element");
        Ok(())
    }
}
