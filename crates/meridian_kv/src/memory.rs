//! In-process key-value store.

use crate::glob::glob_match;
use crate::store::{KvResult, KvStore};
use async_trait::async_trait;
use meridian_error::{KvError, KvErrorKind};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(slot: Slot, ttl: Option<Duration>) -> Self {
        Self {
            slot,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::new(KvErrorKind::WrongType(key.to_string()))
}

/// Key-value store held entirely in memory.
///
/// Expiry is measured with `tokio::time::Instant`, so tests running with a
/// paused clock can move TTLs forward with `tokio::time::advance`.
/// Published messages are delivered to [`MemoryKv::subscribe`] receivers and
/// kept in a log for inspection.
#[derive(Debug)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    published: Mutex<Vec<(String, String)>>,
    bus: broadcast::Sender<(String, String)>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            bus,
        }
    }

    /// Receive every message published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.bus.subscribe()
    }

    /// Messages published so far, as `(channel, message)` pairs.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let mut map = self.entries.lock();
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        f(map.get_mut(key))
    }

    fn with_hash<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(Option<&mut HashMap<String, String>>) -> R,
    ) -> KvResult<R> {
        let mut map = self.entries.lock();
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        if create && !map.contains_key(key) {
            map.insert(key.to_string(), Entry::new(Slot::Hash(HashMap::new()), None));
        }
        match map.get_mut(key) {
            None => Ok(f(None)),
            Some(Entry {
                slot: Slot::Hash(h),
                ..
            }) => Ok(f(Some(h))),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn with_set<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(Option<&mut BTreeSet<String>>) -> R,
    ) -> KvResult<R> {
        let mut map = self.entries.lock();
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        if create && !map.contains_key(key) {
            map.insert(key.to_string(), Entry::new(Slot::Set(BTreeSet::new()), None));
        }
        match map.get_mut(key) {
            None => Ok(f(None)),
            Some(Entry {
                slot: Slot::Set(s),
                ..
            }) => Ok(f(Some(s))),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.with_live(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry::new(Slot::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<bool> {
        let mut map = self.entries.lock();
        let now = Instant::now();
        match map.get(key) {
            Some(e) if !e.is_expired(now) => Ok(false),
            _ => {
                map.insert(key.to_string(), Entry::new(Slot::Str(value.to_string()), ttl));
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> KvResult<bool> {
        let mut map = self.entries.lock();
        let now = Instant::now();
        Ok(map.remove(key).is_some_and(|e| !e.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.with_live(key, |entry| entry.is_some()))
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self.with_live(key, |entry| {
            entry
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now))
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        Ok(self.with_live(key, |entry| match entry {
            Some(e) => {
                e.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64> {
        let mut map = self.entries.lock();
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Slot::Str("0".to_string()), None));
        match &mut entry.slot {
            Slot::Str(s) => {
                let current: i64 = s.parse().map_err(|_| wrong_type(key))?;
                let next = current + delta;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut map = self.entries.lock();
        let now = Instant::now();
        map.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        self.with_hash(key, false, |h| h.and_then(|h| h.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<()> {
        self.with_hash(key, true, |h| {
            if let Some(h) = h {
                h.insert(field.to_string(), value.to_string());
            }
        })
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> KvResult<bool> {
        self.with_hash(key, true, |h| {
            h.is_some_and(|h| {
                if h.contains_key(field) {
                    return false;
                }
                h.insert(field.to_string(), value.to_string());
                true
            })
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> KvResult<bool> {
        let removed = self.with_hash(key, false, |h| {
            h.map(|h| (h.remove(field).is_some(), h.is_empty()))
        })?;
        match removed {
            Some((was_present, now_empty)) => {
                if now_empty {
                    self.entries.lock().remove(key);
                }
                Ok(was_present)
            }
            None => Ok(false),
        }
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.with_hash(key, false, |h| h.cloned().unwrap_or_default())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.with_hash(key, true, |h| {
            let Some(h) = h else { return Ok(0) };
            let current = h.get(field).map(|v| v.parse::<i64>()).transpose();
            match current {
                Ok(current) => {
                    let next = current.unwrap_or(0) + delta;
                    h.insert(field.to_string(), next.to_string());
                    Ok(next)
                }
                Err(_) => Err(wrong_type(key)),
            }
        })?
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<bool> {
        self.with_set(key, true, |s| s.is_some_and(|s| s.insert(member.to_string())))
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        self.with_set(key, false, |s| s.is_some_and(|s| s.remove(member)))
    }

    async fn sismember(&self, key: &str, member: &str) -> KvResult<bool> {
        self.with_set(key, false, |s| s.is_some_and(|s| s.contains(member)))
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        self.with_set(key, false, |s| {
            s.map(|s| s.iter().cloned().collect()).unwrap_or_default()
        })
    }

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        self.published
            .lock()
            .push((channel.to_string(), message.to_string()));
        // No receivers is not an error for pub/sub.
        let _ = self.bus.send((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn rate_limit(&self, key: &str, max: u64, window: Duration) -> KvResult<bool> {
        let count = self.incr_by(key, 1).await?;
        if count == 1 {
            self.expire(key, window).await?;
        }
        Ok(count as u64 <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_expires() {
        let kv = MemoryKv::new();
        kv.set("a", "1", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(!kv.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_only_once() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx("lock", "x", None).await.unwrap());
        assert!(!kv.set_nx("lock", "y", None).await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let kv = MemoryKv::new();
        kv.hset("h", "f", "v").await.unwrap();
        let err = kv.get("h").await.unwrap_err();
        assert!(matches!(err.kind, KvErrorKind::WrongType(_)));
    }

    #[tokio::test]
    async fn test_hash_and_set_operations() {
        let kv = MemoryKv::new();
        assert_eq!(kv.hincr_by("ack", "deleted_items", 3).await.unwrap(), 3);
        assert_eq!(kv.hincr_by("ack", "deleted_items", 2).await.unwrap(), 5);
        kv.hset("ack", "user:alice", "1").await.unwrap();
        assert_eq!(kv.hgetall("ack").await.unwrap().len(), 2);
        assert!(kv.hdel("ack", "user:alice").await.unwrap());
        assert!(kv.hset_nx("ack", "user:bob", "1").await.unwrap());
        assert!(!kv.hset_nx("ack", "user:bob", "2").await.unwrap());
        assert_eq!(kv.hget("ack", "user:bob").await.unwrap().as_deref(), Some("1"));

        assert!(kv.sadd("s", "a").await.unwrap());
        assert!(!kv.sadd("s", "a").await.unwrap());
        assert!(kv.sismember("s", "a").await.unwrap());
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["a".to_string()]);
        assert!(kv.srem("s", "a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window() {
        let kv = MemoryKv::new();
        let window = Duration::from_secs(60);
        assert!(kv.rate_limit("rl", 2, window).await.unwrap());
        assert!(kv.rate_limit("rl", 2, window).await.unwrap());
        assert!(!kv.rate_limit("rl", 2, window).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(kv.rate_limit("rl", 2, window).await.unwrap());
    }
}
