//! Key-value store abstraction for Meridian.
//!
//! Everything that is shared between processes (cache entries, object cache
//! index, browser session snapshots, moderation pointers, acknowledgement
//! documents) goes through the [`KvStore`] trait. Two backends exist:
//!
//! - [`RedisKv`] talks to a Redis-compatible server through a
//!   `redis::aio::ConnectionManager`.
//! - [`MemoryKv`] keeps everything in process, with per-key expiry driven by
//!   `tokio::time`, so paused-clock tests can advance TTLs deterministically.
//!
//! [`KeyedLocks`] serialises work per key inside one process and [`KvLock`]
//! does the same across processes with an expiring `SET NX`.
//!
//! # Example
//!
//! ```
//! use meridian_kv::{KvJsonExt, KvStore, MemoryKv};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), meridian_error::KvError> {
//! let kv = MemoryKv::new();
//! kv.set("instaprofile:nasa", "{}", Some(Duration::from_secs(7200))).await?;
//! assert!(kv.exists("instaprofile:nasa").await?);
//! kv.set_json("counter", &3u32, None).await?;
//! assert_eq!(kv.get_json::<u32>("counter").await?, Some(3));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod glob;
mod lock;
mod memory;
mod remote;
mod store;

pub use glob::glob_match;
pub use lock::{KeyedGuard, KeyedLocks, KvLock};
pub use memory::MemoryKv;
pub use remote::RedisKv;
pub use store::{KvJsonExt, KvResult, KvStore, SharedKv};
