//! Recovery rule engine
//!
//! Ordered rules match on (pattern, domain glob, status range) and emit an
//! action. First match wins. Rules carry running success/failure counters
//! so operators can see which rules earn their place.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::classifier::{DetectedError, ErrorPattern};

/// Actions a rule can prescribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryAction {
    SwitchProxy,
    AddDelay {
        delay_ms: u64,
    },
    SkipDomain {
        duration_ms: u64,
    },
    Retry {
        #[serde(default)]
        clear_cookies: bool,
    },
    SendToDlq,
}

impl RecoveryAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwitchProxy => "switch_proxy",
            Self::AddDelay { .. } => "add_delay",
            Self::SkipDomain { .. } => "skip_domain",
            Self::Retry { .. } => "retry",
            Self::SendToDlq => "send_to_dlq",
        }
    }

    /// Whether this action republished the task with another attempt
    #[must_use]
    pub fn grants_retry(&self) -> bool {
        matches!(
            self,
            Self::SwitchProxy | Self::AddDelay { .. } | Self::Retry { .. }
        )
    }
}

/// Declarative rule definition as stored in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<ErrorPattern>,
    /// Glob over the failing domain, e.g. `*.shop.example`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Inclusive HTTP status range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_range: Option<(u16, u16)>,
    pub action: RecoveryAction,
}

/// A compiled rule with its counters
pub struct RecoveryRule {
    pub spec: RuleSpec,
    matcher: Option<GlobMatcher>,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl RecoveryRule {
    /// Compile a rule spec; an invalid domain glob fails compilation
    pub fn compile(spec: RuleSpec) -> Result<Self, globset::Error> {
        let matcher = match &spec.domain {
            Some(glob) => Some(Glob::new(glob)?.compile_matcher()),
            None => None,
        };
        Ok(Self {
            spec,
            matcher,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    fn matches(&self, detected: &DetectedError) -> bool {
        if let Some(pattern) = self.spec.pattern
            && pattern != detected.pattern
        {
            return false;
        }
        if let Some(matcher) = &self.matcher
            && !matcher.is_match(&detected.domain)
        {
            return false;
        }
        if let Some((low, high)) = self.spec.status_range {
            match detected.status {
                Some(status) if status >= low && status <= high => {}
                _ => return false,
            }
        }
        true
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Ordered first-match-wins rule set
pub struct RuleEngine {
    rules: Vec<RecoveryRule>,
}

impl RuleEngine {
    /// Compile an ordered list of rule specs
    pub fn new(specs: Vec<RuleSpec>) -> Result<Self, globset::Error> {
        let rules = specs
            .into_iter()
            .map(RecoveryRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Default rule set mirroring common operational practice
    #[must_use]
    pub fn with_defaults() -> Self {
        let specs = vec![
            RuleSpec {
                id: "rate-limit-proxy-swap".to_string(),
                pattern: Some(ErrorPattern::RateLimited),
                domain: None,
                status_range: None,
                action: RecoveryAction::SwitchProxy,
            },
            RuleSpec {
                id: "captcha-proxy-swap".to_string(),
                pattern: Some(ErrorPattern::BlockedByCaptcha),
                domain: None,
                status_range: None,
                action: RecoveryAction::SwitchProxy,
            },
            RuleSpec {
                id: "server-error-backoff".to_string(),
                pattern: Some(ErrorPattern::ServerError5xx),
                domain: None,
                status_range: None,
                action: RecoveryAction::AddDelay { delay_ms: 10_000 },
            },
            RuleSpec {
                id: "network-retry".to_string(),
                pattern: Some(ErrorPattern::DnsOrNetwork),
                domain: None,
                status_range: None,
                action: RecoveryAction::Retry { clear_cookies: false },
            },
            RuleSpec {
                id: "auth-dead-letter".to_string(),
                pattern: Some(ErrorPattern::AuthRequired),
                domain: None,
                status_range: None,
                action: RecoveryAction::SendToDlq,
            },
        ];
        // the defaults compile by construction
        Self::new(specs).unwrap_or(Self { rules: Vec::new() })
    }

    /// First rule matching the detected error
    #[must_use]
    pub fn evaluate(&self, detected: &DetectedError) -> Option<&RecoveryRule> {
        self.rules.iter().find(|rule| rule.matches(detected))
    }

    /// Feed back whether a rule's action ultimately worked
    pub fn record_outcome(&self, rule_id: &str, success: bool) {
        if let Some(rule) = self.rules.iter().find(|r| r.spec.id == rule_id) {
            if success {
                rule.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                rule.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
