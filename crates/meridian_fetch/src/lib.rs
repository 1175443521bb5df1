//! Third-party platform fetchers.
//!
//! Each route of the shared API (`instagram.profile`, `tiktok.post`, ...) is
//! served by a [`Fetcher`]. A fetcher validates and canonicalizes its target,
//! names the cache key, and fetches from upstream through a [`FetchContext`]:
//! plain HTTP, a leased browser page, and the render pipeline that turns
//! remote media URLs into CDN URLs. The [`FetcherRegistry`] wraps every call
//! in the handler cache.
//!
//! ```rust,no_run
//! use meridian_fetch::{FetchRequest, FetcherRegistry};
//!
//! # async fn example(registry: FetcherRegistry) -> meridian_error::MeridianResult<()> {
//! let lookup = registry
//!     .run("tiktok.profile", &FetchRequest::new("@mrbeast"))
//!     .await?;
//! println!("{} (cached: {})", lookup.value["unique_id"], lookup.from_cache);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
mod context;
pub mod embedded;
mod fetcher;
mod http;
pub mod platforms;
mod records;

pub use context::{FetchContext, check_status, not_found, parse_error};
pub use fetcher::{FetchRequest, Fetcher, FetcherRegistry, found};
pub use http::{
    Body, DESKTOP_USER_AGENT, FormPart, HttpClient, HttpRequest, HttpResponse, Method,
    ReqwestClient, ScriptedHttp, SharedHttp,
};
pub use records::{Author, CarouselMedia, MediaRef, PostItem, PostRecord, carousel_preview_index};
