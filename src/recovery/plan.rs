//! Recovery plans returned to the task executor

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which subsystem produced the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Rule,
    Default,
    DomainHealth,
    System,
}

/// A structured decision for a failed task
///
/// `should_retry` drives republication with the mutations in `params`
/// (proxy swap, added delay); `action == "send_to_dlq"` dead-letters the
/// task; anything else surfaces the original error for bus-level retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub should_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_millis")]
    pub retry_delay: Option<Duration>,
    pub source: PlanSource,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl RecoveryPlan {
    /// Whether the executor should publish the task to the DLQ
    #[must_use]
    pub fn is_dlq(&self) -> bool {
        self.action == "send_to_dlq"
    }

    /// Proxy assignment carried in the params, if any
    #[must_use]
    pub fn proxy_assignment(&self) -> Option<(String, String)> {
        let id = self.params.get("proxy_id")?.as_str()?;
        let url = self.params.get("proxy_url")?.as_str()?;
        Some((id.to_string(), url.to_string()))
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
