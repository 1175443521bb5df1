//! Read-through cache around fetcher calls.

use crate::CachePolicy;
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use meridian_kv::{KeyedLocks, KvStore, SharedKv};
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;

/// Marker stored for negative entries.
const NEGATIVE: &str = "null";

/// What a fetch found upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    /// The resource exists
    Found(T),
    /// The upstream definitively reported the resource missing
    NotFound,
}

/// Value returned by the cache with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<T> {
    /// The cached or freshly fetched value
    pub value: T,
    /// Whether it was served from the cache
    pub from_cache: bool,
}

/// Read-through cache shared by every handler.
#[derive(Clone)]
pub struct HandlerCache {
    kv: SharedKv,
    locks: KeyedLocks,
}

impl std::fmt::Debug for HandlerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCache").finish_non_exhaustive()
    }
}

impl HandlerCache {
    /// Create a cache over a KV store.
    pub fn new(kv: SharedKv) -> Self {
        Self {
            kv,
            locks: KeyedLocks::new(),
        }
    }

    /// Underlying store.
    pub fn kv(&self) -> &SharedKv {
        &self.kv
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// `force` skips the read but still writes the fresh result. Not-found
    /// results (cached or fresh) come back as a `FetchErrorKind::NotFound`
    /// error; timeouts as `FetchErrorKind::UpstreamTimeout`.
    #[tracing::instrument(skip(self, policy, fetch))]
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        force: bool,
        fetch: F,
    ) -> MeridianResult<Lookup<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = MeridianResult<FetchOutcome<T>>> + Send,
    {
        let _guard = self.locks.lock(key).await;

        if !force {
            if let Some(raw) = self.kv.get(key).await? {
                if raw == NEGATIVE {
                    tracing::debug!("Negative cache hit");
                    return Err(FetchError::new(FetchErrorKind::NotFound(key.to_string())).into());
                }
                match serde_json::from_str::<T>(&raw) {
                    Ok(value) => {
                        tracing::debug!("Cache hit");
                        return Ok(Lookup {
                            value,
                            from_cache: true,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding undecodable cache entry");
                    }
                }
            }
        }

        tracing::debug!("Cache miss, fetching");
        let outcome = match tokio::time::timeout(*policy.timeout(), fetch()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_secs = policy.timeout().as_secs(), "Fetch timed out");
                self.write_negative(key, policy).await?;
                return Err(
                    FetchError::new(FetchErrorKind::UpstreamTimeout(key.to_string())).into(),
                );
            }
        };

        match outcome {
            Ok(FetchOutcome::Found(value)) => {
                let raw = serde_json::to_string(&value).map_err(|e| {
                    FetchError::new(FetchErrorKind::Parse(format!("{}: {}", key, e)))
                })?;
                let ttl = policy.ttl().sample();
                self.kv.set(key, &raw, Some(ttl)).await?;
                tracing::debug!(ttl_secs = ttl.as_secs(), "Cached fresh value");
                Ok(Lookup {
                    value,
                    from_cache: false,
                })
            }
            Ok(FetchOutcome::NotFound) => {
                self.write_negative(key, policy).await?;
                Err(FetchError::new(FetchErrorKind::NotFound(key.to_string())).into())
            }
            Err(e) if e.class().is_negative_cacheable() => {
                self.write_negative(key, policy).await?;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fetch failed, not caching");
                Err(e)
            }
        }
    }

    async fn write_negative(&self, key: &str, policy: &CachePolicy) -> MeridianResult<()> {
        if let Some(ttl) = policy.negative_ttl() {
            let ttl = ttl.sample();
            self.kv.set(key, NEGATIVE, Some(ttl)).await?;
            tracing::debug!(ttl_secs = ttl.as_secs(), "Wrote negative entry");
        }
        Ok(())
    }

    /// Drop the cached entry for `key`.
    pub async fn invalidate(&self, key: &str) -> MeridianResult<bool> {
        Ok(self.kv.del(key).await?)
    }
}
