//! In-memory kv-store for tests and single-process deployments
//!
//! Mirrors the Redis semantics closely enough that the executor, recovery
//! subsystem and dedup layer behave identically against either backend.
//! Expiry is lazy: entries are dropped on first access past their deadline.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::kv::{KvStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Lock-free in-memory store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().expired()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Entry> {
        match self.entries.get(key) {
            Some(entry) if !entry.expired() => Some(entry.clone()),
            Some(_) => {
                drop(self.entries.remove(key));
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live(key) {
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s)),
            Some(_) => Err(StoreError::corrupt(key, "wrong type, expected string")),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        // The entry guard serialises concurrent callers on the same key,
        // which is what makes set-if-absent atomic.
        let fresh = Entry {
            value: Value::Str(value.to_string()),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().expired() {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at: None,
        });
        if slot.expired() {
            *slot = Entry { value: Value::Str("0".to_string()), expires_at: None };
        }
        match &mut slot.value {
            Value::Str(s) => {
                let current: i64 = s.parse().map_err(|e| StoreError::corrupt(key, e))?;
                let next = current + delta;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(StoreError::corrupt(key, "wrong type, expected counter")),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn list_push(
        &self,
        key: &str,
        value: &str,
        max_len: Option<usize>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        if slot.expired() {
            *slot = Entry { value: Value::List(Vec::new()), expires_at: None };
        }
        if let Some(t) = ttl {
            slot.expires_at = Some(Instant::now() + t);
        }
        match &mut slot.value {
            Value::List(items) => {
                items.push(value.to_string());
                if let Some(max) = max_len
                    && items.len() > max
                {
                    let overflow = items.len() - max;
                    items.drain(..overflow);
                }
                Ok(())
            }
            _ => Err(StoreError::corrupt(key, "wrong type, expected list")),
        }
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.live(key) {
            Some(Entry { value: Value::List(items), .. }) => Ok(items),
            Some(_) => Err(StoreError::corrupt(key, "wrong type, expected list")),
            None => Ok(Vec::new()),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        if slot.expired() {
            *slot = Entry { value: Value::Hash(HashMap::new()), expires_at: None };
        }
        match &mut slot.value {
            Value::Hash(map) => {
                map.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(StoreError::corrupt(key, "wrong type, expected hash")),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        match self.live(key) {
            Some(Entry { value: Value::Hash(map), .. }) => Ok(map.get(field).cloned()),
            Some(_) => Err(StoreError::corrupt(key, "wrong type, expected hash")),
            None => Ok(None),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.live(key) {
            Some(Entry { value: Value::Hash(map), .. }) => Ok(map),
            Some(_) => Err(StoreError::corrupt(key, "wrong type, expected hash")),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key)
            && let Value::Hash(map) = &mut entry.value
        {
            map.remove(field);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_is_first_writer_wins() {
        let store = MemoryKvStore::new();
        assert!(store.set_nx("k", "a", None).await.expect("first set_nx"));
        assert!(!store.set_nx("k", "b", None).await.expect("second set_nx"));
        assert_eq!(store.get("k").await.expect("get"), Some("a".to_string()));
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent() {
        let store = MemoryKvStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .expect("set with ttl");
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.get("k").await.expect("get"), None);
        // and set_nx can reclaim the slot
        assert!(store.set_nx("k", "w", None).await.expect("set_nx after expiry"));
    }

    #[tokio::test]
    async fn list_push_bounds_from_the_tail() {
        let store = MemoryKvStore::new();
        for i in 0..5 {
            store
                .list_push("buf", &i.to_string(), Some(3), None)
                .await
                .expect("push");
        }
        let items = store.list_range("buf").await.expect("range");
        assert_eq!(items, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn incr_by_creates_and_accumulates() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr_by("n", 3).await.expect("incr"), 3);
        assert_eq!(store.incr_by("n", -1).await.expect("incr"), 2);
    }

    #[tokio::test]
    async fn hashes_round_trip() {
        let store = MemoryKvStore::new();
        store.hash_set("h", "a", "1").await.expect("hset");
        store.hash_set("h", "b", "2").await.expect("hset");
        assert_eq!(store.hash_get("h", "a").await.expect("hget"), Some("1".to_string()));
        assert_eq!(store.hash_get_all("h").await.expect("hgetall").len(), 2);
        store.hash_del("h", "a").await.expect("hdel");
        assert_eq!(store.hash_get("h", "a").await.expect("hget"), None);
    }
}
