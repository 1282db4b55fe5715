//! Shared key-value store for cross-worker coordination
//!
//! Dedup sets, domain health, the proxy pool, sliding-window buffers and
//! recovery history all live behind the [`KvStore`] trait. Production runs
//! use the Redis implementation; tests and single-process runs use the
//! in-memory one.

pub mod dedup;
pub mod domain_health;
pub mod kv;
pub mod memory;
pub mod redis;

pub use dedup::Deduplicator;
pub use domain_health::{DomainHealthRecord, DomainHealthTracker};
pub use kv::{KvStore, StoreError};
pub use memory::MemoryKvStore;
pub use redis::RedisKvStore;
