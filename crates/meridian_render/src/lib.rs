//! Media render pipeline.
//!
//! A render downloads a remote media URL, validates the payload, optionally
//! transcodes it, and writes the artifact into the [`ObjectCache`]. Starting
//! a render returns the cache filename at once; the work continues in the
//! background and concurrent starts for one filename share a single render.
//!
//! ```rust,no_run
//! use meridian_kv::{MemoryKv, SharedKv};
//! use meridian_render::{HttpSource, RenderConfig, RenderPipeline, RenderRequest};
//! use meridian_storage::{FileSystemStorage, ObjectCache, ObjectCacheConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kv: SharedKv = Arc::new(MemoryKv::new());
//! let disk = Arc::new(FileSystemStorage::new("/tmp/api-cache")?);
//! let cache = Arc::new(ObjectCache::new(disk, kv.clone(), ObjectCacheConfig::default()));
//! let pipeline = RenderPipeline::new(cache, kv, Arc::new(HttpSource::new()?), RenderConfig::default());
//!
//! let handle = pipeline.start(RenderRequest::image("https://cdn.example/a.jpg", "Pinterest")).await?;
//! println!("will be served at {}", handle.url());
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`ObjectCache`]: meridian_storage::ObjectCache

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod ffmpeg;
mod payload;
mod pipeline;
mod rendition;
mod source;

pub use config::{RenderConfig, RenderConfigBuilder};
pub use ffmpeg::Ffmpeg;
pub use payload::{Checked, check_payload, is_iso_bmff, is_webm, reencode_jpeg};
pub use pipeline::{
    AudioTags, PASSIVE_URL_KEY, RENDER_FAILED_PREFIX, RenderHandle, RenderPipeline, RenderRequest,
};
pub use rendition::{Rendition, principal_and_preview};
pub use source::{Download, HttpSource, MediaSource};
