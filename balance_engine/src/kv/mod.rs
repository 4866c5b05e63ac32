//! Key-value store abstraction for locks, queues and caches.
//!
//! Production deployments share a Redis instance between nodes ([`RedisStore`]). A single node, and the test suite,
//! can run everything against [`MemoryStore`], which honours the same TTL and atomicity semantics in-process.
mod keys;
mod lock;
mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
pub use keys::*;
pub use lock::{LeaseExtender, LeaseLock, LockError};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("Could not connect to the key-value store: {0}")]
    Connection(String),
    #[error("Key-value command failed: {0}")]
    Command(String),
    #[error("Key {0} holds a value of the wrong type")]
    WrongType(String),
}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            Self::Connection(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Sets `key` only if it does not exist. Returns true when the value was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Deletes `key` if it currently holds `expected`. Returns true when deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    /// Resets the TTL of `key` if it currently holds `expected`. Returns true when extended.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Pops from the tail of the list, waiting up to `timeout` for an element.
    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, KvError>;

    async fn llen(&self, key: &str) -> Result<usize, KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Stores `value` under `key` if the key is absent or holds a smaller integer. Returns true when stored.
    async fn check_and_set_greater(&self, key: &str, value: i64, ttl: Duration) -> Result<bool, KvError>;
}
