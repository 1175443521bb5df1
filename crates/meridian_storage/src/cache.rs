//! Object cache: artifact bytes on a backend, existence and mime in the KV index.

use crate::{ArtifactStorage, mime_for_filename};
use derive_getters::Getters;
use meridian_error::{MeridianErrorKind, MeridianResult, StorageErrorKind};
use meridian_kv::{KeyedLocks, SharedKv};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INDEX_PREFIX: &str = "objcache:";

fn index_key(filename: &str) -> String {
    format!("{}{}", INDEX_PREFIX, filename)
}

/// Configuration for the object cache.
#[derive(
    Debug,
    Clone,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
pub struct ObjectCacheConfig {
    /// Public origin artifacts are served from; URLs are `{cdn_base}/{filename}`
    #[serde(default = "default_cdn_base")]
    cdn_base: String,

    /// TTL applied when a put does not name one (seconds)
    #[serde(default = "default_ttl_secs")]
    default_ttl_secs: u64,
}

fn default_cdn_base() -> String {
    "http://localhost:8091/media".to_string()
}

fn default_ttl_secs() -> u64 {
    691_200 // 8 days
}

impl Default for ObjectCacheConfig {
    fn default() -> Self {
        Self {
            cdn_base: default_cdn_base(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

/// A cached artifact as read back from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Cache filename
    pub filename: String,
    /// Artifact bytes
    pub bytes: Vec<u8>,
    /// Mime type recorded at put time
    pub mime: String,
    /// Public URL
    pub url: String,
}

/// Counts removed by an admin invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDelete {
    /// KV keys removed
    pub redis: u64,
    /// Files removed
    pub disk: u64,
}

/// Content cache of rendered media.
///
/// A filename resolves to at most one artifact. Puts for the same filename
/// are serialised by a per-filename lock, and a put that finds the artifact
/// already indexed once it holds the lock leaves it alone.
pub struct ObjectCache {
    backend: Arc<dyn ArtifactStorage>,
    kv: SharedKv,
    locks: KeyedLocks,
    config: ObjectCacheConfig,
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ObjectCache {
    /// Create a cache over a backend and a KV index.
    pub fn new(backend: Arc<dyn ArtifactStorage>, kv: SharedKv, config: ObjectCacheConfig) -> Self {
        tracing::debug!(
            cdn_base = %config.cdn_base,
            default_ttl_secs = config.default_ttl_secs,
            "Creating object cache"
        );
        Self {
            backend,
            kv,
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Cache configuration.
    pub fn config(&self) -> &ObjectCacheConfig {
        &self.config
    }

    /// Public URL of a filename.
    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.config.cdn_base.trim_end_matches('/'), filename)
    }

    /// Default artifact TTL.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.config.default_ttl_secs)
    }

    /// Store an artifact and index it.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn put(
        &self,
        filename: &str,
        bytes: &[u8],
        mime: &str,
        ttl: Option<Duration>,
    ) -> MeridianResult<String> {
        let _guard = self.locks.lock(filename).await;
        let key = index_key(filename);

        if self.kv.exists(&key).await? && self.backend.exists(filename).await? {
            tracing::debug!("Artifact already cached, coalescing put");
            return Ok(self.url_for(filename));
        }

        self.backend.store(filename, bytes).await?;
        let ttl = ttl.unwrap_or_else(|| self.default_ttl());
        self.kv.set(&key, mime, Some(ttl)).await?;

        tracing::info!(ttl_secs = ttl.as_secs(), mime, "Cached artifact");
        Ok(self.url_for(filename))
    }

    /// Read an artifact. `None` when it is not indexed or its file is gone.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, filename: &str) -> MeridianResult<Option<Artifact>> {
        let Some(mime) = self.kv.get(&index_key(filename)).await? else {
            tracing::debug!("Artifact not indexed");
            return Ok(None);
        };

        let bytes = match self.backend.retrieve(filename).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let missing = matches!(
                    e.kind(),
                    MeridianErrorKind::Storage(s) if matches!(s.kind, StorageErrorKind::NotFound(_))
                );
                if missing {
                    tracing::warn!("Indexed artifact missing on disk");
                    return Ok(None);
                }
                return Err(e);
            }
        };

        let mime = if mime.is_empty() {
            mime_for_filename(filename)
        } else {
            mime
        };
        Ok(Some(Artifact {
            filename: filename.to_string(),
            url: self.url_for(filename),
            bytes,
            mime,
        }))
    }

    /// Cheap existence check against the index.
    pub async fn has(&self, filename: &str) -> MeridianResult<bool> {
        Ok(self.kv.exists(&index_key(filename)).await?)
    }

    /// Remaining TTL of an artifact.
    pub async fn ttl(&self, filename: &str) -> MeridianResult<Option<Duration>> {
        Ok(self.kv.ttl(&index_key(filename)).await?)
    }

    /// Admin invalidation: remove every KV key containing `target` and every
    /// artifact file whose name contains it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_matching(&self, target: &str) -> MeridianResult<CacheDelete> {
        let mut removed = CacheDelete::default();

        for key in self.kv.keys(&format!("*{}*", target)).await? {
            if self.kv.del(&key).await? {
                removed.redis += 1;
            }
        }

        for filename in self.backend.list().await? {
            if filename.contains(target) && self.backend.delete(&filename).await? {
                removed.disk += 1;
            }
        }

        tracing::info!(redis = removed.redis, disk = removed.disk, "Invalidated cache entries");
        Ok(removed)
    }

    /// Remove files whose index entry has expired. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> MeridianResult<usize> {
        let mut removed = 0;
        for filename in self.backend.list().await? {
            if self.locks.is_locked(&filename) {
                continue;
            }
            if !self.kv.exists(&index_key(&filename)).await? && self.backend.delete(&filename).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Swept expired artifacts");
        }
        Ok(removed)
    }

    /// Run [`ObjectCache::sweep`] every `period` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Object cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(error = %e, "Object cache sweep failed");
                        }
                    }
                }
            }
        })
    }
}
