//! Pagination nodes: `paginate` and `infinite_scroll`

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::time::Duration;

use super::context::ExecutionContext;
use super::links::resolve_link;
use super::registry::NodeExecutor;
use crate::driver::{WaitOptions, WaitState};
use crate::executor::ExecError;
use crate::model::Node;

#[derive(Debug, Deserialize)]
struct PaginateParams {
    next_selector: String,
    #[serde(default = "default_max_pages")]
    max_pages: usize,
    /// When present, links matching this are collected on every page
    #[serde(default)]
    link_selector: Option<String>,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default = "default_wait_ms")]
    wait_ms: u64,
}

fn default_max_pages() -> usize {
    10
}

fn default_wait_ms() -> u64 {
    1_000
}

/// Clicks through "next" up to `max_pages`, harvesting links per page
///
/// Links on the first page are captured before the first click.
pub struct PaginateExecutor;

#[async_trait]
impl NodeExecutor for PaginateExecutor {
    fn node_type(&self) -> &'static str {
        "paginate"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: PaginateParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("paginate params: {e}")))?;

        collect_page_links(ctx, params.link_selector.as_deref(), params.marker.clone()).await?;

        for page_index in 1..params.max_pages {
            // the next control disappearing is the normal stop condition
            if ctx
                .page
                .query_selector(&params.next_selector)
                .await?
                .is_none()
            {
                debug!("paginate {}: no next control after page {page_index}", node.id);
                break;
            }
            ctx.page.click(&params.next_selector).await?;
            let wait = WaitOptions::default()
                .state(WaitState::Attached)
                .timeout(Duration::from_millis(params.wait_ms.max(100) * 10));
            // settle: either the body re-renders or the wait just elapses
            let _ = ctx.page.wait_for_state("body", WaitState::Attached, wait).await;
            tokio::time::sleep(Duration::from_millis(params.wait_ms)).await;

            collect_page_links(ctx, params.link_selector.as_deref(), params.marker.clone())
                .await?;
        }
        Ok(())
    }
}

async fn collect_page_links(
    ctx: &mut ExecutionContext,
    link_selector: Option<&str>,
    marker: Option<String>,
) -> Result<(), ExecError> {
    let Some(selector) = link_selector else {
        return Ok(());
    };
    let base = ctx.page.url().await.unwrap_or_default();
    let elements = ctx.page.query_selector_all(selector).await?;
    for element in &elements {
        if let Some(href) = element.attribute("href").await?
            && let Some(resolved) = resolve_link(&base, &href)
        {
            ctx.discover(resolved, marker.clone());
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct InfiniteScrollParams {
    #[serde(default = "default_max_scrolls")]
    max_scrolls: usize,
    #[serde(default = "default_wait_between")]
    wait_between_ms: u64,
    /// Stop early once this selector appears
    #[serde(default)]
    end_selector: Option<String>,
}

fn default_max_scrolls() -> usize {
    10
}

fn default_wait_between() -> u64 {
    1_000
}

/// Scrolls to the document end until the height stops growing
pub struct InfiniteScrollExecutor;

#[async_trait]
impl NodeExecutor for InfiniteScrollExecutor {
    fn node_type(&self) -> &'static str {
        "infinite_scroll"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: InfiniteScrollParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("infinite_scroll params: {e}")))?;

        let mut last_height = page_height(ctx).await?;
        for scroll in 0..params.max_scrolls {
            ctx.page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await?;
            tokio::time::sleep(Duration::from_millis(params.wait_between_ms)).await;

            if let Some(end_selector) = &params.end_selector
                && ctx.page.query_selector(end_selector).await?.is_some()
            {
                debug!("infinite_scroll {}: end selector appeared at scroll {scroll}", node.id);
                break;
            }

            let height = page_height(ctx).await?;
            if height <= last_height {
                debug!("infinite_scroll {}: height settled at {height}", node.id);
                break;
            }
            last_height = height;
        }
        Ok(())
    }
}

async fn page_height(ctx: &ExecutionContext) -> Result<i64, ExecError> {
    let value = ctx.page.evaluate("document.body.scrollHeight").await?;
    Ok(value.as_i64().unwrap_or(0))
}
