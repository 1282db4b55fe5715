//! Redis-backed kv-store for multi-worker deployments

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;

use super::kv::{KvStore, StoreError};

/// Kv-store implementation over a Redis connection manager
///
/// The connection manager reconnects transparently; individual command
/// failures surface as [`StoreError::Unavailable`] and are handled by the
/// caller's fatal-error path (nack, let the bus redeliver).
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    /// Connect to the given Redis URL (`redis://host:port/db`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis connect: {e}")))?;
        Ok(Self { conn })
    }

    fn io(err: redis::RedisError) -> StoreError {
        StoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(Self::io)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(t) => conn
                .set_ex(key, value, t.as_secs().max(1))
                .await
                .map_err(Self::io),
            None => conn.set(key, value).await.map_err(Self::io),
        }
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // SET NX EX in a single round trip keeps the check atomic
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(t) = ttl {
            cmd.arg("EX").arg(t.as_secs().max(1));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(Self::io)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(Self::io)?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, delta).await.map_err(Self::io)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(Self::io)?;
        Ok(())
    }

    async fn list_push(
        &self,
        key: &str,
        value: &str,
        max_len: Option<usize>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.rpush(key, value).ignore();
        if let Some(max) = max_len {
            // keep the newest max entries
            pipe.ltrim(key, -(max as isize), -1).ignore();
        }
        if let Some(t) = ttl {
            pipe.expire(key, t.as_secs().max(1) as i64).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(Self::io)?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, 0, -1).await.map_err(Self::io)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await.map_err(Self::io)?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(Self::io)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(Self::io)
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await.map_err(Self::io)?;
        Ok(())
    }
}
