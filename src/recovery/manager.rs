//! Recovery coordination
//!
//! `try_recover` is the single entry point the task executor calls on
//! failure. It classifies the error, records it, consults domain health and
//! the sliding window, and turns a rule (or pattern default) into a
//! [`RecoveryPlan`] with its side effects applied: proxy swaps, domain
//! blocks, incident reports, history bookkeeping.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::classifier::{DetectedError, ErrorClassifier, ErrorPattern};
use super::incidents::IncidentReporter;
use super::plan::{PlanSource, RecoveryPlan};
use super::proxy::ProxyManager;
use super::rules::{RecoveryAction, RuleEngine};
use super::tracker::SlidingWindowTracker;
use crate::model::{RecoveryAttempt, Task};
use crate::store::{DomainHealthTracker, KvStore, StoreError};

/// Limits and TTLs for the recovery loop
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    /// Executor republish cap; reaching it without a rule-granted retry
    /// dead-letters the task
    pub max_retries: u32,
    /// Hard ceiling even for rule-granted retries
    pub absolute_retry_cap: u32,
    pub history_ttl: Duration,
    pub domain_block_ttl: Duration,
    pub default_retry_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            absolute_retry_cap: 6,
            history_ttl: Duration::from_secs(60 * 60),
            domain_block_ttl: Duration::from_secs(300),
            default_retry_delay: Duration::from_secs(5),
        }
    }
}

/// The recovery subsystem's public face
pub struct RecoveryManager {
    classifier: ErrorClassifier,
    tracker: SlidingWindowTracker,
    rules: RuleEngine,
    proxies: ProxyManager,
    incidents: IncidentReporter,
    domain_health: DomainHealthTracker,
    store: Arc<dyn KvStore>,
    config: RecoveryConfig,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        rules: RuleEngine,
        incidents: IncidentReporter,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            tracker: SlidingWindowTracker::new(Arc::clone(&store)),
            rules,
            proxies: ProxyManager::new(Arc::clone(&store)),
            incidents,
            domain_health: DomainHealthTracker::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &SlidingWindowTracker {
        &self.tracker
    }

    #[must_use]
    pub fn proxies(&self) -> &ProxyManager {
        &self.proxies
    }

    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    fn history_key(task_id: &str) -> String {
        format!("recovery:history:{task_id}")
    }

    /// Decide what to do about a failed task
    ///
    /// Returns `None` when the failure was recorded but the sliding window
    /// has not triggered; the caller surfaces the original error and lets
    /// the bus redeliver.
    pub async fn try_recover(
        &self,
        task: &Task,
        error_message: &str,
        status: Option<u16>,
        page_content: Option<&str>,
    ) -> Result<Option<RecoveryPlan>, StoreError> {
        let detected = self
            .classifier
            .classify(error_message, &task.url, status, page_content);
        debug!(
            "recovery: task {} failed with {} on {}",
            task.task_id,
            detected.pattern.as_str(),
            detected.domain
        );

        self.tracker.record(&detected.domain, false).await?;
        self.domain_health
            .record_failure(&detected.domain, detected.pattern.as_str())
            .await?;
        if let Some(proxy_id) = &task.proxy_id {
            self.proxies.record_failure(proxy_id).await?;
        }

        // a blocked domain short-circuits everything
        if self.domain_health.is_blocked(&detected.domain).await? {
            let plan = RecoveryPlan {
                action: "skip_domain".to_string(),
                params: serde_json::json!({ "domain": detected.domain }),
                should_retry: false,
                retry_delay: None,
                source: PlanSource::DomainHealth,
                reason: format!("domain {} is blocked", detected.domain),
                rule_id: None,
            };
            self.append_history(task, &detected, &plan).await?;
            return Ok(Some(plan));
        }

        // the retry cap turns terminal regardless of window state
        if task.retry_count >= self.config.max_retries {
            return self.resolve_at_cap(task, &detected).await.map(Some);
        }

        if !self.tracker.should_trigger(&detected.domain).await? {
            // recorded, but not enough signal to act on
            return Ok(None);
        }

        let plan = match self.rules.evaluate(&detected) {
            Some(rule) => {
                self.plan_from_action(task, &detected, rule.spec.action.clone(), PlanSource::Rule, Some(rule.spec.id.clone()))
                    .await?
            }
            None => self.default_plan(task, &detected).await?,
        };

        if plan.is_dlq() {
            self.open_incident(task, &detected).await?;
        }
        self.append_history(task, &detected, &plan).await?;
        Ok(Some(plan))
    }

    /// Clear failure state after a task completes
    pub async fn record_task_success(&self, task: &Task) -> Result<(), StoreError> {
        if let Some(domain) = crate::store::domain_health::extract_domain(&task.url) {
            self.tracker.record(&domain, true).await?;
            self.domain_health.record_success(&domain).await?;
        }
        if let Some(proxy_id) = &task.proxy_id {
            self.proxies.record_success(proxy_id).await?;
        }

        // credit the rule whose retry produced this success, then drop the
        // task's history
        for attempt in self.history(&task.task_id).await? {
            if let Some(rule_id) = &attempt.rule_id {
                self.rules.record_outcome(rule_id, true);
            }
        }
        self.store.del(&Self::history_key(&task.task_id)).await
    }

    /// Recorded recovery attempts for a task, oldest first
    pub async fn history(&self, task_id: &str) -> Result<Vec<RecoveryAttempt>, StoreError> {
        let raw = self.store.list_range(&Self::history_key(task_id)).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    async fn resolve_at_cap(
        &self,
        task: &Task,
        detected: &DetectedError,
    ) -> Result<RecoveryPlan, StoreError> {
        // past the soft cap only an explicit retry-granting rule keeps the
        // task alive, and the absolute cap overrides even that
        if task.retry_count < self.config.absolute_retry_cap
            && let Some(rule) = self.rules.evaluate(detected)
            && rule.spec.action.grants_retry()
        {
            info!(
                "rule {} extends retries for task {} past the cap",
                rule.spec.id, task.task_id
            );
            let plan = self
                .plan_from_action(
                    task,
                    detected,
                    rule.spec.action.clone(),
                    PlanSource::Rule,
                    Some(rule.spec.id.clone()),
                )
                .await?;
            self.append_history(task, detected, &plan).await?;
            return Ok(plan);
        }

        warn!(
            "task {} exhausted {} retries with {}, dead-lettering",
            task.task_id,
            task.retry_count,
            detected.pattern.as_str()
        );
        let plan = RecoveryPlan {
            action: "send_to_dlq".to_string(),
            params: serde_json::Value::Null,
            should_retry: false,
            retry_delay: None,
            source: PlanSource::System,
            reason: format!(
                "retry count {} reached cap with {}",
                task.retry_count,
                detected.pattern.as_str()
            ),
            rule_id: None,
        };
        self.open_incident(task, detected).await?;
        self.append_history(task, detected, &plan).await?;
        Ok(plan)
    }

    async fn plan_from_action(
        &self,
        task: &Task,
        detected: &DetectedError,
        action: RecoveryAction,
        source: PlanSource,
        rule_id: Option<String>,
    ) -> Result<RecoveryPlan, StoreError> {
        let plan = match action {
            RecoveryAction::SwitchProxy => {
                let lease = self
                    .proxies
                    .switch_proxy(&detected.domain, task.proxy_id.as_deref())
                    .await?;
                match lease {
                    Some(lease) => RecoveryPlan {
                        action: "switch_proxy".to_string(),
                        params: serde_json::json!({
                            "proxy_id": lease.proxy.id,
                            "proxy_url": lease.proxy.endpoint,
                        }),
                        should_retry: true,
                        retry_delay: Some(self.config.default_retry_delay),
                        source,
                        reason: format!("switching proxy for {}", detected.domain),
                        rule_id,
                    },
                    None => RecoveryPlan {
                        // no proxy to switch to; retry plain with a delay
                        action: "retry".to_string(),
                        params: serde_json::Value::Null,
                        should_retry: true,
                        retry_delay: Some(self.config.default_retry_delay),
                        source,
                        reason: "proxy pool empty, retrying without switch".to_string(),
                        rule_id,
                    },
                }
            }
            RecoveryAction::AddDelay { delay_ms } => RecoveryPlan {
                action: "add_delay".to_string(),
                params: serde_json::json!({ "delay_ms": delay_ms }),
                should_retry: true,
                retry_delay: Some(Duration::from_millis(delay_ms)),
                source,
                reason: format!("delaying {}ms before retry", delay_ms),
                rule_id,
            },
            RecoveryAction::SkipDomain { duration_ms } => {
                let ttl = Duration::from_millis(duration_ms);
                self.domain_health
                    .block(&detected.domain, ttl, detected.pattern.as_str())
                    .await?;
                RecoveryPlan {
                    action: "skip_domain".to_string(),
                    params: serde_json::json!({
                        "domain": detected.domain,
                        "duration_ms": duration_ms,
                    }),
                    should_retry: false,
                    retry_delay: None,
                    source,
                    reason: format!("blocking {} for {}ms", detected.domain, duration_ms),
                    rule_id,
                }
            }
            RecoveryAction::Retry { clear_cookies } => RecoveryPlan {
                action: "retry".to_string(),
                params: serde_json::json!({ "clear_cookies": clear_cookies }),
                should_retry: true,
                retry_delay: Some(self.config.default_retry_delay),
                source,
                reason: "rule-directed retry".to_string(),
                rule_id,
            },
            RecoveryAction::SendToDlq => RecoveryPlan {
                action: "send_to_dlq".to_string(),
                params: serde_json::Value::Null,
                should_retry: false,
                retry_delay: None,
                source,
                reason: format!("{} is terminal", detected.pattern.as_str()),
                rule_id,
            },
        };
        Ok(plan)
    }

    /// Pattern defaults when no rule matches a triggered window
    async fn default_plan(
        &self,
        task: &Task,
        detected: &DetectedError,
    ) -> Result<RecoveryPlan, StoreError> {
        let action = match detected.pattern {
            ErrorPattern::RateLimited => RecoveryAction::AddDelay { delay_ms: 30_000 },
            ErrorPattern::Timeout
            | ErrorPattern::DnsOrNetwork
            | ErrorPattern::ServerError5xx
            | ErrorPattern::NavigationFailure
            | ErrorPattern::Unknown => RecoveryAction::Retry { clear_cookies: false },
            ErrorPattern::BlockedByCaptcha | ErrorPattern::AuthRequired => {
                RecoveryAction::SendToDlq
            }
            ErrorPattern::ElementMissing => {
                // content problems do not improve on retry; surface without
                // a plan mutation and let the bus decide
                return Ok(RecoveryPlan {
                    action: "none".to_string(),
                    params: serde_json::Value::Null,
                    should_retry: false,
                    retry_delay: None,
                    source: PlanSource::Default,
                    reason: "element missing; not retryable".to_string(),
                    rule_id: None,
                });
            }
        };
        self.plan_from_action(task, detected, action, PlanSource::Default, None)
            .await
    }

    async fn open_incident(&self, task: &Task, detected: &DetectedError) -> Result<(), StoreError> {
        let attempts = self.history(&task.task_id).await?;
        for attempt in &attempts {
            if let Some(rule_id) = &attempt.rule_id {
                self.rules.record_outcome(rule_id, false);
            }
        }
        self.incidents.report(task, detected, attempts).await
    }

    async fn append_history(
        &self,
        task: &Task,
        detected: &DetectedError,
        plan: &RecoveryPlan,
    ) -> Result<(), StoreError> {
        let attempt = RecoveryAttempt {
            attempted_at: Utc::now(),
            action: plan.action.clone(),
            error_pattern: detected.pattern.as_str().to_string(),
            rule_id: plan.rule_id.clone(),
            succeeded: plan.should_retry,
        };
        let raw = serde_json::to_string(&attempt)
            .map_err(|e| StoreError::corrupt(&Self::history_key(&task.task_id), e))?;
        self.store
            .list_push(
                &Self::history_key(&task.task_id),
                &raw,
                Some(32),
                Some(self.config.history_ttl),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Phase, PhaseType, Proxy, WorkflowConfig};
    use crate::recovery::incidents::MemoryIncidentStore;
    use crate::store::MemoryKvStore;

    fn test_task(url: &str, retry_count: u32) -> Task {
        let mut task = Task::seed(
            "e1",
            "w1",
            url,
            Phase {
                id: "p1".to_string(),
                phase_type: PhaseType::Extraction,
                nodes: vec![],
                url_filter: None,
                transition: None,
            },
            WorkflowConfig::default(),
        );
        task.retry_count = retry_count;
        task
    }

    fn manager_with(store: Arc<MemoryKvStore>, incidents: Arc<MemoryIncidentStore>) -> RecoveryManager {
        RecoveryManager::new(
            store,
            RuleEngine::with_defaults(),
            IncidentReporter::new(incidents),
            RecoveryConfig::default(),
        )
    }

    #[tokio::test]
    async fn below_window_threshold_produces_no_plan() {
        let store = Arc::new(MemoryKvStore::new());
        let manager = manager_with(store, Arc::new(MemoryIncidentStore::new()));

        let plan = manager
            .try_recover(&test_task("https://a.example/x", 0), "timeout", None, None)
            .await
            .expect("recover");
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn consecutive_429s_switch_proxy() {
        let store = Arc::new(MemoryKvStore::new());
        let manager = manager_with(Arc::clone(&store), Arc::new(MemoryIncidentStore::new()));
        manager
            .proxies()
            .add_proxy(&Proxy::new("p-old", "http://10.0.0.1:3128"))
            .await
            .expect("add");
        manager
            .proxies()
            .add_proxy(&Proxy::new("p-new", "http://10.0.0.2:3128"))
            .await
            .expect("add");

        let mut task = test_task("https://d.example/x", 0);
        task.proxy_id = Some("p-old".to_string());
        task.proxy_url = Some("http://10.0.0.1:3128".to_string());

        // two failures record without a plan, the third triggers
        for _ in 0..2 {
            let plan = manager
                .try_recover(&task, "429 too many requests", Some(429), None)
                .await
                .expect("recover");
            assert!(plan.is_none());
        }
        let plan = manager
            .try_recover(&task, "429 too many requests", Some(429), None)
            .await
            .expect("recover")
            .expect("triggered");

        assert_eq!(plan.action, "switch_proxy");
        assert!(plan.should_retry);
        let (new_id, _) = plan.proxy_assignment().expect("assignment");
        assert_eq!(new_id, "p-new");

        // the old proxy's failure counter moved
        let pool = manager.proxies().list().await.expect("list");
        let old = pool.iter().find(|p| p.id == "p-old").expect("old proxy");
        assert_eq!(old.failure_count, 3);
    }

    #[tokio::test]
    async fn cap_reached_dead_letters_and_opens_incident() {
        let store = Arc::new(MemoryKvStore::new());
        let incidents = Arc::new(MemoryIncidentStore::new());
        let manager = manager_with(store, Arc::clone(&incidents));

        let task = test_task("https://x.example/login", 3);
        let plan = manager
            .try_recover(&task, "401 unauthorized", Some(401), None)
            .await
            .expect("recover")
            .expect("plan at cap");

        assert!(plan.is_dlq());
        assert!(!plan.should_retry);
        assert_eq!(incidents.reports().await.len(), 1);
    }

    #[tokio::test]
    async fn blocked_domain_short_circuits() {
        let store = Arc::new(MemoryKvStore::new());
        let manager = manager_with(Arc::clone(&store), Arc::new(MemoryIncidentStore::new()));
        DomainHealthTracker::new(store)
            .block("b.example", Duration::from_secs(60), "rate_limited")
            .await
            .expect("block");

        let plan = manager
            .try_recover(&test_task("https://b.example/x", 0), "timeout", None, None)
            .await
            .expect("recover")
            .expect("short-circuit");
        assert_eq!(plan.action, "skip_domain");
        assert_eq!(plan.source, PlanSource::DomainHealth);
        assert!(!plan.should_retry);
    }

    #[tokio::test]
    async fn success_clears_history() {
        let store = Arc::new(MemoryKvStore::new());
        let manager = manager_with(Arc::clone(&store), Arc::new(MemoryIncidentStore::new()));

        let task = test_task("https://h.example/x", 0);
        for _ in 0..3 {
            let _ = manager
                .try_recover(&task, "connection reset", None, None)
                .await
                .expect("recover");
        }
        assert!(!manager.history(&task.task_id).await.expect("history").is_empty());

        manager.record_task_success(&task).await.expect("success");
        assert!(manager.history(&task.task_id).await.expect("history").is_empty());
    }
}
