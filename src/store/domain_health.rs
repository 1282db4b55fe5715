//! Domain health with TTL'd blocks
//!
//! A blocked domain short-circuits recovery into `SkipDomain` until the
//! block expires. Counters accumulate across workers through the shared
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::kv::{KvStore, StoreError};

/// Per-domain health record persisted as JSON in the kv-store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainHealthRecord {
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_pattern: Option<String>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

fn default_healthy() -> bool {
    true
}

impl Default for DomainHealthRecord {
    fn default() -> Self {
        Self {
            healthy: true,
            blocked_until: None,
            last_failure_pattern: None,
            success_count: 0,
            failure_count: 0,
        }
    }
}

impl DomainHealthRecord {
    /// Whether the domain is currently blocked
    #[must_use]
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// Shared tracker for domain-level block/backoff state
pub struct DomainHealthTracker {
    store: Arc<dyn KvStore>,
}

impl DomainHealthTracker {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(domain: &str) -> String {
        format!("domain:health:{domain}")
    }

    /// Current record for a domain, defaulting to healthy when unseen
    pub async fn get(&self, domain: &str) -> Result<DomainHealthRecord, StoreError> {
        let key = Self::key(domain);
        match self.store.get(&key).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(&key, e))
            }
            None => Ok(DomainHealthRecord::default()),
        }
    }

    /// Whether requests to the domain should be skipped right now
    pub async fn is_blocked(&self, domain: &str) -> Result<bool, StoreError> {
        Ok(self.get(domain).await?.is_blocked(Utc::now()))
    }

    /// Block a domain for the given duration, recording the failure pattern
    pub async fn block(
        &self,
        domain: &str,
        ttl: Duration,
        pattern: &str,
    ) -> Result<(), StoreError> {
        let mut record = self.get(domain).await?;
        record.healthy = false;
        record.blocked_until =
            Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()));
        record.last_failure_pattern = Some(pattern.to_string());
        self.put(domain, &record).await
    }

    /// Record a successful request; lifts any expired block
    pub async fn record_success(&self, domain: &str) -> Result<(), StoreError> {
        let mut record = self.get(domain).await?;
        record.success_count += 1;
        if !record.is_blocked(Utc::now()) {
            record.healthy = true;
            record.blocked_until = None;
        }
        self.put(domain, &record).await
    }

    /// Record a failed request without blocking
    pub async fn record_failure(&self, domain: &str, pattern: &str) -> Result<(), StoreError> {
        let mut record = self.get(domain).await?;
        record.failure_count += 1;
        record.last_failure_pattern = Some(pattern.to_string());
        self.put(domain, &record).await
    }

    async fn put(&self, domain: &str, record: &DomainHealthRecord) -> Result<(), StoreError> {
        let key = Self::key(domain);
        let raw = serde_json::to_string(record).map_err(|e| StoreError::corrupt(&key, e))?;
        self.store.set(&key, &raw, None).await
    }
}

/// Extract the host portion of a URL for domain-keyed tracking
#[must_use]
pub fn extract_domain(url_str: &str) -> Option<String> {
    url::Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
}
