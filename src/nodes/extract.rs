//! The `extract` node
//!
//! Takes a schema name and a field dictionary. Each field runs optional
//! pre-actions (a nested node list through the same registry), extracts
//! text/html/attribute in single or multi mode, applies a transform, and
//! falls back to its declared default on failure. A field may instead be a
//! key/value-pair extraction with two selectors and an output format.
//! Produces one item object per invocation.

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Weak;

use super::context::ExecutionContext;
use super::registry::{NodeExecutor, NodeRegistry, run_node};
use crate::driver::DynElement;
use crate::executor::{ExecError, RetryPolicy};
use crate::model::Node;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("static regex"));

#[derive(Debug, Deserialize)]
struct ExtractParams {
    #[serde(default)]
    schema: Option<String>,
    fields: HashMap<String, FieldSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FieldKind {
    #[default]
    Text,
    Html,
    Attribute,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Transform {
    #[default]
    Trim,
    Lowercase,
    Uppercase,
    CleanHtml,
    RemoveWhitespace,
    Number,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum KvFormat {
    #[default]
    Object,
    Array,
    ArrayOfArrays,
}

#[derive(Debug, Deserialize)]
struct KeyValueSpec {
    key_selector: String,
    value_selector: String,
    #[serde(default)]
    format: KvFormat,
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    #[serde(default)]
    selector: Option<String>,
    #[serde(rename = "type", default)]
    kind: FieldKind,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    multiple: bool,
    #[serde(default)]
    transform: Option<Transform>,
    #[serde(default)]
    default: Option<Value>,
    /// Nested action nodes run before this field extracts
    #[serde(default)]
    pre_actions: Vec<Node>,
    #[serde(default)]
    key_value: Option<KeyValueSpec>,
}

pub struct ExtractExecutor {
    registry: Weak<NodeRegistry>,
}

impl ExtractExecutor {
    #[must_use]
    pub fn new(registry: Weak<NodeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeExecutor for ExtractExecutor {
    fn node_type(&self) -> &'static str {
        "extract"
    }

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError> {
        let params: ExtractParams = serde_json::from_value(node.params.clone())
            .map_err(|e| ExecError::Validation(format!("extract params: {e}")))?;

        let mut item = serde_json::Map::new();
        if let Some(schema) = &params.schema {
            item.insert("_schema".to_string(), Value::String(schema.clone()));
        }

        for (name, field) in &params.fields {
            if !field.pre_actions.is_empty() {
                self.run_pre_actions(ctx, &field.pre_actions).await;
            }

            let value = match extract_field(ctx, field).await {
                Ok(Some(value)) => value,
                Ok(None) => field.default.clone().unwrap_or(Value::Null),
                Err(e) => {
                    debug!("field {name} extraction failed ({e}), using default");
                    field.default.clone().unwrap_or(Value::Null)
                }
            };
            item.insert(name.clone(), value);
        }

        ctx.extracted_items.push(Value::Object(item));
        Ok(())
    }
}

impl ExtractExecutor {
    /// Pre-actions reuse the executor pipeline; their failures don't fail
    /// the field, extraction just proceeds against whatever state remains
    async fn run_pre_actions(&self, ctx: &mut ExecutionContext, actions: &[Node]) {
        let Some(registry) = self.registry.upgrade() else {
            warn!("registry gone during pre-actions");
            return;
        };
        for action in actions {
            if let Err(e) = run_node(&registry, ctx, action, RetryPolicy::default()).await {
                debug!("pre-action {} failed: {e}", action.id);
            }
        }
    }
}

async fn extract_field(
    ctx: &ExecutionContext,
    field: &FieldSpec,
) -> Result<Option<Value>, ExecError> {
    if let Some(kv) = &field.key_value {
        return extract_key_value(ctx, kv, field.transform).await;
    }

    let selector = field
        .selector
        .as_deref()
        .ok_or_else(|| ExecError::Validation("field needs selector or key_value".to_string()))?;

    if field.multiple {
        let elements = ctx.page.query_selector_all(selector).await?;
        let mut values = Vec::with_capacity(elements.len());
        for element in &elements {
            if let Some(value) = element_value(element, field).await? {
                values.push(value);
            }
        }
        // zero matches falls through to the default like the single case
        if values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Array(values)))
        }
    } else {
        match ctx.page.query_selector(selector).await? {
            Some(element) => element_value(&element, field).await,
            None => Ok(None),
        }
    }
}

async fn element_value(
    element: &DynElement,
    field: &FieldSpec,
) -> Result<Option<Value>, ExecError> {
    let raw = match field.kind {
        FieldKind::Text => element.text().await?,
        FieldKind::Html => element.inner_html().await?,
        FieldKind::Attribute => {
            let name = field.attribute.as_deref().ok_or_else(|| {
                ExecError::Validation("attribute extraction needs an attribute name".to_string())
            })?;
            match element.attribute(name).await? {
                Some(value) => value,
                None => return Ok(None),
            }
        }
    };
    Ok(Some(apply_transform(&raw, field.transform.unwrap_or_default())))
}

/// Zip key and value selections; the pair count is the shorter side
async fn extract_key_value(
    ctx: &ExecutionContext,
    kv: &KeyValueSpec,
    transform: Option<Transform>,
) -> Result<Option<Value>, ExecError> {
    let keys = ctx.page.query_selector_all(&kv.key_selector).await?;
    let values = ctx.page.query_selector_all(&kv.value_selector).await?;

    let transform = transform.unwrap_or_default();
    let mut pairs = Vec::with_capacity(keys.len().min(values.len()));
    for (key_el, value_el) in keys.iter().zip(values.iter()) {
        let key = key_el.text().await?;
        let value = value_el.text().await?;
        pairs.push((
            key.trim().to_string(),
            apply_transform(&value, transform),
        ));
    }
    if pairs.is_empty() {
        return Ok(None);
    }

    let result = match kv.format {
        KvFormat::Object => {
            let mut map = serde_json::Map::new();
            for (key, value) in pairs {
                map.insert(key, value);
            }
            Value::Object(map)
        }
        KvFormat::Array => Value::Array(
            pairs
                .into_iter()
                .map(|(key, value)| {
                    serde_json::json!({ "key": key, "value": value })
                })
                .collect(),
        ),
        KvFormat::ArrayOfArrays => Value::Array(
            pairs
                .into_iter()
                .map(|(key, value)| Value::Array(vec![Value::String(key), value]))
                .collect(),
        ),
    };
    Ok(Some(result))
}

fn apply_transform(raw: &str, transform: Transform) -> Value {
    match transform {
        Transform::Trim => Value::String(raw.trim().to_string()),
        Transform::Lowercase => Value::String(raw.trim().to_lowercase()),
        Transform::Uppercase => Value::String(raw.trim().to_uppercase()),
        Transform::CleanHtml => {
            let stripped = TAG_RE.replace_all(raw, " ");
            let collapsed = WS_RE.replace_all(stripped.trim(), " ");
            Value::String(collapsed.to_string())
        }
        Transform::RemoveWhitespace => Value::String(WS_RE.replace_all(raw, "").to_string()),
        Transform::Number => match NUMBER_RE.find(raw) {
            Some(found) => {
                let normalised = found.as_str().replace(',', ".");
                match normalised.parse::<f64>() {
                    Ok(n) => serde_json::Number::from_f64(n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                    Err(_) => Value::Null,
                }
            }
            None => Value::Null,
        },
    }
}
