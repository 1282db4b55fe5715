//! Distributed proxy pool
//!
//! Proxy records live in the shared kv-store so every worker sees the same
//! health picture. `get_proxy` hands out a leased proxy with domain
//! affinity: repeat requests for the same domain stick to the same proxy
//! while the lease lives. Crossing the failure-ratio threshold benches a
//! proxy until its cooldown expires.

use chrono::Utc;
use log::{debug, info, warn};
use rand::seq::IteratorRandom;
use std::sync::Arc;
use std::time::Duration;

use crate::model::Proxy;
use crate::store::{KvStore, StoreError};

const POOL_KEY: &str = "proxy:pool";

/// Tuning for pool health decisions
#[derive(Debug, Clone, Copy)]
pub struct ProxyManagerConfig {
    pub lease_ttl: Duration,
    /// Bench a proxy when failures/total exceeds this
    pub failure_threshold: f64,
    /// Outcomes required before the threshold applies
    pub min_samples: u64,
    pub cooldown: Duration,
}

impl Default for ProxyManagerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(600),
            failure_threshold: 0.5,
            min_samples: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// A proxy handed out under a TTL'd lease
#[derive(Debug, Clone)]
pub struct ProxyLease {
    pub proxy: Proxy,
    pub ttl: Duration,
}

/// Shared pool manager
pub struct ProxyManager {
    store: Arc<dyn KvStore>,
    config: ProxyManagerConfig,
}

impl ProxyManager {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, config: ProxyManagerConfig::default() }
    }

    #[must_use]
    pub fn with_config(store: Arc<dyn KvStore>, config: ProxyManagerConfig) -> Self {
        Self { store, config }
    }

    fn lease_key(proxy_id: &str) -> String {
        format!("proxy:lease:{proxy_id}")
    }

    fn affinity_key(domain: &str) -> String {
        format!("proxy:domain:{domain}")
    }

    /// Register or update a pool member
    pub async fn add_proxy(&self, proxy: &Proxy) -> Result<(), StoreError> {
        let raw = serde_json::to_string(proxy)
            .map_err(|e| StoreError::corrupt(POOL_KEY, e))?;
        self.store.hash_set(POOL_KEY, &proxy.id, &raw).await
    }

    /// Remove a pool member and its lease/affinity residue
    pub async fn remove_proxy(&self, proxy_id: &str) -> Result<(), StoreError> {
        self.store.hash_del(POOL_KEY, proxy_id).await?;
        self.store.del(&Self::lease_key(proxy_id)).await
    }

    /// All pool members, available-first and priority-sorted
    pub async fn list(&self) -> Result<Vec<Proxy>, StoreError> {
        let raw = self.store.hash_get_all(POOL_KEY).await?;
        let now = Utc::now();
        let mut proxies: Vec<Proxy> = raw
            .values()
            .filter_map(|value| serde_json::from_str(value).ok())
            .collect();
        proxies.sort_by(|a, b| {
            b.available(now)
                .cmp(&a.available(now))
                .then(b.priority.cmp(&a.priority))
        });
        Ok(proxies)
    }

    /// Lease a proxy for a domain, sticky while the lease lives
    ///
    /// Returns `None` when the pool has no available member.
    pub async fn get_proxy(&self, domain: &str) -> Result<Option<ProxyLease>, StoreError> {
        // sticky path: an unexpired affinity entry pins the domain
        if let Some(pinned_id) = self.store.get(&Self::affinity_key(domain)).await? {
            if let Some(proxy) = self.fetch(&pinned_id).await?
                && proxy.available(Utc::now())
            {
                debug!("sticky proxy {pinned_id} for domain {domain}");
                return Ok(Some(ProxyLease { proxy, ttl: self.config.lease_ttl }));
            }
            // pinned proxy vanished or got benched; drop the pin
            self.store.del(&Self::affinity_key(domain)).await?;
        }

        let now = Utc::now();
        let candidates = self.list().await?;
        let best_priority = candidates
            .iter()
            .filter(|p| p.available(now))
            .map(|p| p.priority)
            .max();
        let Some(best_priority) = best_priority else {
            warn!("proxy pool has no available member for domain {domain}");
            return Ok(None);
        };
        // spread load across equally-ranked proxies
        let chosen = candidates
            .iter()
            .filter(|p| p.available(now) && p.priority == best_priority)
            .choose(&mut rand::rng())
            .cloned();

        let Some(mut proxy) = chosen else {
            return Ok(None);
        };

        proxy.last_used = Some(now);
        if !proxy.assigned_domains.iter().any(|d| d == domain) {
            proxy.assigned_domains.push(domain.to_string());
        }
        // a benched proxy whose cooldown expired re-enters healthy
        if !proxy.healthy && proxy.available(now) {
            proxy.healthy = true;
            proxy.cooldown_until = None;
            info!("proxy {} recovered from cooldown", proxy.id);
        }
        self.add_proxy(&proxy).await?;

        self.store
            .set(&Self::lease_key(&proxy.id), domain, Some(self.config.lease_ttl))
            .await?;
        self.store
            .set(&Self::affinity_key(domain), &proxy.id, Some(self.config.lease_ttl))
            .await?;

        Ok(Some(ProxyLease { proxy, ttl: self.config.lease_ttl }))
    }

    /// Re-lease a domain onto a different proxy than the one it had
    ///
    /// Drops the domain's affinity pin and picks among available members
    /// excluding `exclude_id`. Falls back to the excluded proxy only when
    /// it is the sole member left.
    pub async fn switch_proxy(
        &self,
        domain: &str,
        exclude_id: Option<&str>,
    ) -> Result<Option<ProxyLease>, StoreError> {
        self.store.del(&Self::affinity_key(domain)).await?;

        let now = Utc::now();
        let candidates = self.list().await?;
        let chosen = candidates
            .iter()
            .filter(|p| p.available(now) && Some(p.id.as_str()) != exclude_id)
            .max_by_key(|p| p.priority)
            .or_else(|| candidates.iter().find(|p| p.available(now)))
            .cloned();

        let Some(mut proxy) = chosen else {
            return Ok(None);
        };

        proxy.last_used = Some(now);
        if !proxy.assigned_domains.iter().any(|d| d == domain) {
            proxy.assigned_domains.push(domain.to_string());
        }
        self.add_proxy(&proxy).await?;
        self.store
            .set(&Self::lease_key(&proxy.id), domain, Some(self.config.lease_ttl))
            .await?;
        self.store
            .set(&Self::affinity_key(domain), &proxy.id, Some(self.config.lease_ttl))
            .await?;

        debug!("switched domain {domain} to proxy {}", proxy.id);
        Ok(Some(ProxyLease { proxy, ttl: self.config.lease_ttl }))
    }

    /// Record a successful request through a proxy
    pub async fn record_success(&self, proxy_id: &str) -> Result<(), StoreError> {
        if let Some(mut proxy) = self.fetch(proxy_id).await? {
            proxy.success_count += 1;
            self.add_proxy(&proxy).await?;
        }
        Ok(())
    }

    /// Record a failure; benches the proxy past the threshold
    pub async fn record_failure(&self, proxy_id: &str) -> Result<(), StoreError> {
        if let Some(mut proxy) = self.fetch(proxy_id).await? {
            proxy.failure_count += 1;
            let total = proxy.success_count + proxy.failure_count;
            if total >= self.config.min_samples
                && proxy.failure_ratio() > self.config.failure_threshold
                && proxy.healthy
            {
                proxy.healthy = false;
                proxy.cooldown_until = Some(
                    Utc::now()
                        + chrono::Duration::from_std(self.config.cooldown)
                            .unwrap_or_else(|_| chrono::Duration::seconds(300)),
                );
                warn!(
                    "proxy {proxy_id} benched: {}/{} failures",
                    proxy.failure_count, total
                );
            }
            self.add_proxy(&proxy).await?;
        }
        Ok(())
    }

    async fn fetch(&self, proxy_id: &str) -> Result<Option<Proxy>, StoreError> {
        match self.store.hash_get(POOL_KEY, proxy_id).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(POOL_KEY, e)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn manager() -> ProxyManager {
        ProxyManager::with_config(
            Arc::new(MemoryKvStore::new()),
            ProxyManagerConfig {
                lease_ttl: Duration::from_secs(60),
                failure_threshold: 0.5,
                min_samples: 4,
                cooldown: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn empty_pool_returns_none() {
        let m = manager();
        assert!(m.get_proxy("x.example").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn affinity_is_sticky_within_lease() {
        let m = manager();
        m.add_proxy(&Proxy::new("p1", "http://10.0.0.1:3128")).await.expect("add");
        m.add_proxy(&Proxy::new("p2", "http://10.0.0.2:3128")).await.expect("add");

        let first = m.get_proxy("shop.example").await.expect("get").expect("lease");
        for _ in 0..5 {
            let again = m.get_proxy("shop.example").await.expect("get").expect("lease");
            assert_eq!(again.proxy.id, first.proxy.id);
        }
    }

    #[tokio::test]
    async fn benched_proxy_is_not_handed_out() {
        let m = manager();
        m.add_proxy(&Proxy::new("p1", "http://10.0.0.1:3128")).await.expect("add");
        m.add_proxy(&Proxy::new("p2", "http://10.0.0.2:3128")).await.expect("add");

        let leased = m.get_proxy("d.example").await.expect("get").expect("lease");
        let benched_id = leased.proxy.id.clone();

        // 4 failures with no successes crosses the 50% threshold
        for _ in 0..4 {
            m.record_failure(&benched_id).await.expect("failure");
        }

        let next = m.get_proxy("d.example").await.expect("get").expect("lease");
        assert_ne!(next.proxy.id, benched_id);
    }

    #[tokio::test]
    async fn counters_track_outcomes() {
        let m = manager();
        m.add_proxy(&Proxy::new("p1", "http://10.0.0.1:3128")).await.expect("add");
        m.record_success("p1").await.expect("success");
        m.record_success("p1").await.expect("success");
        m.record_failure("p1").await.expect("failure");

        let pool = m.list().await.expect("list");
        assert_eq!(pool[0].success_count, 2);
        assert_eq!(pool[0].failure_count, 1);
        assert!(pool[0].healthy);
    }

    #[tokio::test]
    async fn priority_orders_the_pool() {
        let m = manager();
        let mut low = Proxy::new("low", "http://10.0.0.1:3128");
        low.priority = 1;
        let mut high = Proxy::new("high", "http://10.0.0.2:3128");
        high.priority = 10;
        m.add_proxy(&low).await.expect("add");
        m.add_proxy(&high).await.expect("add");

        let lease = m.get_proxy("p.example").await.expect("get").expect("lease");
        assert_eq!(lease.proxy.id, "high");
    }
}
