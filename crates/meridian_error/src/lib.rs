//! Error types for the Meridian media API and moderation core.
//!
//! This crate provides the foundation error types used throughout the Meridian workspace.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern for clean error handling:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! Every error can be projected onto an [`ErrorClass`], which is what the HTTP
//! layer and the moderation command surface use to decide how to report it.
//!
//! # Examples
//!
//! ```
//! use meridian_error::{ErrorClass, FetchError, FetchErrorKind, MeridianResult};
//!
//! fn lookup() -> MeridianResult<String> {
//!     Err(FetchError::new(FetchErrorKind::NotFound("instaprofile:nobody".into())))?
//! }
//!
//! match lookup() {
//!     Ok(data) => println!("Got: {}", data),
//!     Err(e) => assert_eq!(e.class(), ErrorClass::NotFound),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod browser;
mod class;
mod config;
mod database;
mod error;
mod fetch;
mod http;
mod json;
mod kv;
mod moderation;
mod render;
mod storage;

pub use api::{ApiError, ApiErrorKind};
pub use browser::{BrowserError, BrowserErrorKind};
pub use class::ErrorClass;
pub use config::ConfigError;
pub use database::{DatabaseError, DatabaseErrorKind};
pub use error::{MeridianError, MeridianErrorKind, MeridianResult};
pub use fetch::{FetchError, FetchErrorKind};
pub use http::HttpError;
pub use json::JsonError;
pub use kv::{KvError, KvErrorKind};
pub use moderation::{ModerationError, ModerationErrorKind};
pub use render::{RenderError, RenderErrorKind};
pub use storage::{StorageError, StorageErrorKind};
