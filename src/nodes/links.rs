//! Link collection nodes: `extract_links` and `discover_links`
//!
//! Collects `href` attributes from matched elements, resolves relative URLs
//! against the current page, drops non-navigable schemes and fragments,
//! tags each result with an optional marker and obeys a limit. The two tags
//! share one implementation; they differ only in workflow intent.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::context::ExecutionContext;
use super::registry::NodeExecutor;
use crate::executor::ExecError;
use crate::model::Node;

#[derive(Debug, Deserialize)]
struct LinksParams {
    selector: String,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    /// Attribute holding the target; `href` unless overridden
    #[serde(default)]
    attribute: Option<String>,
}

pub struct LinksExecutor {
    tag: &'static str,
}

impl LinksExecutor {
    #[must_use]
    pub fn extract_links() -> Self {
        Self { tag: "extract_links" }
    }

    #[must_use]
    pub fn discover_links() -> Self {
        Self { tag: "discover_links" }
    }
}

#[async_trait]
impl NodeExecutor for LinksExecutor {
    fn node_type(&self) -> &'static str {
        self.tag
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: LinksParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("{} params: {e}", self.tag)))?;

        let base = ctx.page.url().await.unwrap_or_default();
        let attribute = params.attribute.as_deref().unwrap_or("href");
        let elements = ctx.page.query_selector_all(&params.selector).await?;

        let mut collected = 0;
        for element in &elements {
            if let Some(limit) = params.limit
                && collected >= limit
            {
                break;
            }
            let Some(href) = element.attribute(attribute).await? else {
                continue;
            };
            let Some(resolved) = resolve_link(&base, &href) else {
                continue;
            };
            ctx.discover(resolved, params.marker.clone());
            collected += 1;
        }

        debug!(
            "node {} collected {collected} links from {} elements",
            node.id,
            elements.len()
        );
        Ok(())
    }
}

/// Resolve an href against the page URL, rejecting non-navigable targets
#[must_use]
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:")
    {
        return None;
    }

    let resolved = if let Ok(absolute) = url::Url::parse(trimmed) {
        absolute
    } else {
        let base = url::Url::parse(base).ok()?;
        base.join(trimmed).ok()?
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_links_resolve_against_the_page() {
        assert_eq!(
            resolve_link("https://x.example/catalog/", "item/1"),
            Some("https://x.example/catalog/item/1".to_string())
        );
        assert_eq!(
            resolve_link("https://x.example/catalog", "/item/2"),
            Some("https://x.example/item/2".to_string())
        );
    }

    #[test]
    fn absolute_links_pass_through() {
        assert_eq!(
            resolve_link("https://x.example/", "https://other.example/p"),
            Some("https://other.example/p".to_string())
        );
    }

    #[test]
    fn non_navigable_targets_drop() {
        for href in ["javascript:void(0)", "mailto:a@b.c", "tel:+123", "#anchor", "  ", "ftp://x/y"] {
            assert_eq!(resolve_link("https://x.example/", href), None, "href: {href}");
        }
    }
}
