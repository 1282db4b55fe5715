//! URL deduplication per (execution, phase)
//!
//! A URL is handed to the node pipeline at most once per (execution, phase)
//! tuple. The set lives in the shared kv-store so the guarantee holds across
//! duplicate bus deliveries to different workers.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use super::kv::{KvStore, StoreError};

/// Default lifetime of a dedup entry; long enough to outlive any execution
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Distributed first-writer-wins URL set
pub struct Deduplicator {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl Deduplicator {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, ttl: DEFAULT_TTL }
    }

    #[must_use]
    pub fn with_ttl(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Claim a URL for this (execution, phase); true when this caller won
    pub async fn claim(
        &self,
        execution_id: &str,
        phase_id: &str,
        url: &str,
    ) -> Result<bool, StoreError> {
        let key = dedup_key(execution_id, phase_id, url);
        self.store.set_nx(&key, "1", Some(self.ttl)).await
    }

    /// Release a claim so a redelivered or republished task can re-claim
    ///
    /// Called when a task fails without completing; without the release,
    /// the bus's retry of the same (execution, phase, URL) would
    /// short-circuit on its own claim.
    pub async fn release(
        &self,
        execution_id: &str,
        phase_id: &str,
        url: &str,
    ) -> Result<(), StoreError> {
        let key = dedup_key(execution_id, phase_id, url);
        self.store.del(&key).await
    }

    /// Whether a URL has already been claimed, without claiming it
    pub async fn seen(
        &self,
        execution_id: &str,
        phase_id: &str,
        url: &str,
    ) -> Result<bool, StoreError> {
        let key = dedup_key(execution_id, phase_id, url);
        Ok(self.store.get(&key).await?.is_some())
    }
}

/// `dedup:{execution_id}:{phase_id}:{sha256(url)}`
#[must_use]
pub fn dedup_key(execution_id: &str, phase_id: &str, url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("dedup:{execution_id}:{phase_id}:{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn claim_is_unique_per_execution_and_phase() {
        let store = Arc::new(MemoryKvStore::new());
        let dedup = Deduplicator::new(store);

        assert!(dedup.claim("e1", "p1", "http://x/a").await.expect("first claim"));
        assert!(!dedup.claim("e1", "p1", "http://x/a").await.expect("duplicate claim"));

        // same URL is fresh under a different phase or execution
        assert!(dedup.claim("e1", "p2", "http://x/a").await.expect("other phase"));
        assert!(dedup.claim("e2", "p1", "http://x/a").await.expect("other execution"));
    }

    #[tokio::test]
    async fn concurrent_claims_elect_one_winner() {
        let store = Arc::new(MemoryKvStore::new());
        let dedup = Arc::new(Deduplicator::new(store));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dedup = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                dedup.claim("e1", "p1", "http://x/hot").await.expect("claim")
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn key_format_is_stable() {
        let key = dedup_key("e1", "p1", "http://x/a");
        assert!(key.starts_with("dedup:e1:p1:"));
        // sha256 hex digest
        assert_eq!(key.rsplit(':').next().map(str::len), Some(64));
    }
}
