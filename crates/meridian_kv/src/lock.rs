//! Per-key locks, in process and across processes.

use crate::store::{KvResult, SharedKv};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;
const KV_LOCK_POLL: Duration = Duration::from_millis(50);

/// Single-flight mutexes keyed by string.
///
/// Holding a [`KeyedGuard`] for `"render_X"` blocks every other caller that
/// locks `"render_X"` until the guard drops. Entries are weak, so keys nobody
/// holds are pruned as the map grows.
///
/// ```
/// use meridian_kv::KeyedLocks;
///
/// # async fn demo() {
/// let locks = KeyedLocks::new();
/// let guard = locks.lock("instaprofile:nasa").await;
/// assert!(locks.is_locked("instaprofile:nasa"));
/// drop(guard);
/// assert!(!locks.is_locked("instaprofile:nasa"));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

/// Guard returned by [`KeyedLocks::lock`].
#[derive(Debug)]
pub struct KeyedGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock();
        if map.len() > PRUNE_THRESHOLD {
            map.retain(|_, weak| weak.strong_count() > 0);
        }
        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(AsyncMutex::new(()));
        map.insert(key.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    /// Wait for exclusive use of `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self.mutex_for(key);
        KeyedGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Take `key` only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyedGuard> {
        let mutex = self.mutex_for(key);
        mutex
            .try_lock_owned()
            .ok()
            .map(|guard| KeyedGuard { _guard: guard })
    }

    /// Whether someone currently holds or waits on `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.inner
            .lock()
            .get(key)
            .and_then(Weak::upgrade)
            .is_some_and(|m| m.try_lock().is_err())
    }
}

/// Expiring lock shared by every process that talks to the same store.
///
/// Acquired with `SET key token NX PX ttl`; released by deleting the key when
/// it still carries this holder's token. A crashed holder releases by expiry.
pub struct KvLock {
    kv: SharedKv,
    key: String,
    token: String,
}

impl std::fmt::Debug for KvLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvLock").field("key", &self.key).finish()
    }
}

impl KvLock {
    /// Try to take the lock once.
    pub async fn try_acquire(
        kv: SharedKv,
        key: impl Into<String>,
        ttl: Duration,
    ) -> KvResult<Option<Self>> {
        let key = key.into();
        let token = uuid::Uuid::new_v4().to_string();
        if kv.set_nx(&key, &token, Some(ttl)).await? {
            tracing::debug!(key = %key, "Acquired kv lock");
            Ok(Some(Self { kv, key, token }))
        } else {
            Ok(None)
        }
    }

    /// Poll for the lock until `wait` elapses.
    #[tracing::instrument(skip(kv, key), fields(key))]
    pub async fn acquire(
        kv: SharedKv,
        key: impl Into<String>,
        ttl: Duration,
        wait: Duration,
    ) -> KvResult<Option<Self>> {
        let key = key.into();
        tracing::Span::current().record("key", key.as_str());
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(lock) = Self::try_acquire(kv.clone(), key.clone(), ttl).await? {
                return Ok(Some(lock));
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!("Gave up waiting for kv lock");
                return Ok(None);
            }
            tokio::time::sleep(KV_LOCK_POLL).await;
        }
    }

    /// Key this lock guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock if it is still ours.
    pub async fn release(self) -> KvResult<()> {
        if self.kv.get(&self.key).await?.as_deref() == Some(self.token.as_str()) {
            self.kv.del(&self.key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_lock_conflicts() {
        let locks = KeyedLocks::new();
        let held = locks.try_lock("a").unwrap();
        assert!(locks.try_lock("a").is_none());
        assert!(locks.try_lock("b").is_some());
        drop(held);
        assert!(locks.try_lock("a").is_some());
    }
}
