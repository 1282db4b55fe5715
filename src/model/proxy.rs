//! Proxy records owned by the recovery subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection parameters a driver needs to route through a proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A pool member with health accounting, persisted in the shared kv-store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// Benched until this instant after crossing the failure threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_domains: Vec<String>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub priority: i64,
}

fn default_healthy() -> bool {
    true
}

impl Proxy {
    /// Build a healthy pool member with zeroed counters
    #[must_use]
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            username: None,
            password: None,
            success_count: 0,
            failure_count: 0,
            last_used: None,
            cooldown_until: None,
            assigned_domains: Vec::new(),
            healthy: true,
            priority: 0,
        }
    }

    /// Failure ratio over all recorded outcomes; 0.0 when unused
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.failure_count as f64 / total as f64
    }

    /// Whether the proxy may serve requests right now
    #[must_use]
    pub fn available(&self, now: DateTime<Utc>) -> bool {
        if self.healthy {
            return true;
        }
        match self.cooldown_until {
            Some(until) => now >= until,
            None => false,
        }
    }

    /// Connection config for this proxy
    #[must_use]
    pub fn config(&self) -> ProxyConfig {
        ProxyConfig {
            url: self.endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn failure_ratio_handles_unused_proxy() {
        let proxy = Proxy::new("p1", "http://127.0.0.1:8080");
        assert_eq!(proxy.failure_ratio(), 0.0);
    }

    #[test]
    fn benched_proxy_recovers_after_cooldown() {
        let now = Utc::now();
        let mut proxy = Proxy::new("p1", "http://127.0.0.1:8080");
        proxy.healthy = false;
        proxy.cooldown_until = Some(now + Duration::seconds(30));

        assert!(!proxy.available(now));
        assert!(proxy.available(now + Duration::seconds(31)));
    }
}
