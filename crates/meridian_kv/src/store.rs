//! The key-value store trait.

use async_trait::async_trait;
use meridian_error::{KvError, KvErrorKind};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Result alias for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Shared handle to a store, as held by every service.
pub type SharedKv = Arc<dyn KvStore>;

/// Operations the Meridian services need from a Redis-compatible store.
///
/// Values are strings. Structured values are stored as JSON through
/// [`KvJsonExt`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Write a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<bool>;

    /// Delete a key of any type. Returns whether it existed.
    async fn del(&self, key: &str) -> KvResult<bool>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Remaining time to live. `None` when the key is absent or persistent.
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    /// Set a TTL on an existing key. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool>;

    /// Atomically add `delta` to an integer value, creating it at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64>;

    /// Keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>>;

    /// Read one hash field.
    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>>;

    /// Write one hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<()>;

    /// Write one hash field unless it is already set. Returns whether it was written.
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> KvResult<bool>;

    /// Delete one hash field. Returns whether it existed.
    async fn hdel(&self, key: &str, field: &str) -> KvResult<bool>;

    /// Read a whole hash.
    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>>;

    /// Atomically add `delta` to an integer hash field.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64>;

    /// Add a set member. Returns whether it was new.
    async fn sadd(&self, key: &str, member: &str) -> KvResult<bool>;

    /// Remove a set member. Returns whether it was present.
    async fn srem(&self, key: &str, member: &str) -> KvResult<bool>;

    /// Set membership test.
    async fn sismember(&self, key: &str, member: &str) -> KvResult<bool>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> KvResult<Vec<String>>;

    /// Publish a message on a pub/sub channel.
    async fn publish(&self, channel: &str, message: &str) -> KvResult<()>;

    /// Fixed-window rate limiter: count one hit against `key` and report
    /// whether the window still allows it.
    async fn rate_limit(&self, key: &str, max: u64, window: Duration) -> KvResult<bool>;
}

/// JSON helpers available on every [`KvStore`].
#[async_trait]
pub trait KvJsonExt: KvStore {
    /// Read and decode a JSON value.
    async fn get_json<T>(&self, key: &str) -> KvResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                KvError::new(KvErrorKind::Serialization(format!("{}: {}", key, e)))
            }),
            None => Ok(None),
        }
    }

    /// Encode and write a JSON value.
    async fn set_json<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> KvResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = serde_json::to_string(value)
            .map_err(|e| KvError::new(KvErrorKind::Serialization(format!("{}: {}", key, e))))?;
        self.set(key, &raw, ttl).await
    }
}

impl<S: KvStore + ?Sized> KvJsonExt for S {}
