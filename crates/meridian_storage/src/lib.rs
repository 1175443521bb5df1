//! Object cache of rendered media artifacts.
//!
//! Artifacts live on disk under a flat cache directory and are indexed in the
//! key-value store under `objcache:{filename}` with their mime type and TTL.
//! The index is the source of truth for existence: a file whose index entry
//! has expired is garbage and is removed by the sweep task.
//!
//! # Filenames
//!
//! Filenames are derived from the source URL so the same upstream object
//! always lands under the same name:
//!
//! ```
//! use meridian_storage::{MediaType, artifact_filename};
//!
//! let a = artifact_filename("TikTok", "https://cdn.example/v/abc.jpeg?sig=1", None, None, MediaType::Image);
//! let b = artifact_filename("TikTok", "https://cdn.example/v/abc.jpeg?sig=2", None, None, MediaType::Image);
//! assert_eq!(a, b);
//! assert!(a.starts_with("TikTok") && a.ends_with(".jpg"));
//! ```
//!
//! # Example
//!
//! ```rust
//! use meridian_kv::{MemoryKv, SharedKv};
//! use meridian_storage::{FileSystemStorage, ObjectCache, ObjectCacheConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kv: SharedKv = Arc::new(MemoryKv::new());
//! let disk = Arc::new(FileSystemStorage::new("/tmp/api-cache")?);
//! let cache = ObjectCache::new(disk, kv, ObjectCacheConfig::default());
//!
//! cache.put("Instagram0a1b2c3d.jpg", b"jpeg bytes", "image/jpeg", None).await?;
//! let artifact = cache.get("Instagram0a1b2c3d.jpg").await?.expect("stored");
//! assert_eq!(artifact.mime, "image/jpeg");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod filename;
mod filesystem;
mod media_type;
mod storage;

pub use cache::{Artifact, CacheDelete, ObjectCache, ObjectCacheConfig, ObjectCacheConfigBuilder};
pub use filename::{artifact_filename, is_heic_url, normalize_suffix, prekey_for};
pub use filesystem::FileSystemStorage;
pub use media_type::{MediaType, mime_for_filename};
pub use meridian_error::{StorageError, StorageErrorKind};
pub use storage::ArtifactStorage;
