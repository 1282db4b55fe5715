//! The distributed key-value abstraction

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Error type for kv-store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store cannot be reached; callers on the critical path
    /// treat this as fatal and let the bus redeliver
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value failed to round-trip through its codec
    #[error("corrupt value at {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("store operation failed: {0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn corrupt(key: &str, err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// Narrow kv surface used for all cross-worker shared state
///
/// Semantics follow Redis: strings with optional TTLs, lists, hashes and
/// atomic counters. Implementations must make `set_nx` atomic; dedup
/// correctness across workers depends on it.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomic set-if-absent; returns true when the key was newly set
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic increment, creating the key at `delta` when absent
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Append to a list, optionally bounding its length from the tail
    async fn list_push(
        &self,
        key: &str,
        value: &str,
        max_len: Option<usize>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Whole list, oldest first
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), StoreError>;
}
