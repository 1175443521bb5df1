//! Read-through caching for fetcher handlers.
//!
//! Every third-party lookup is wrapped by [`HandlerCache::get_or_fetch`]:
//!
//! 1. A single-flight lock on the natural key (`platform:resource:id`) is
//!    taken, so concurrent cold misses run the fetch once.
//! 2. A live KV entry is decoded and returned.
//! 3. Otherwise the fetch runs under the policy timeout. Successes are stored
//!    with a fixed or jittered TTL; definitive not-found results and upstream
//!    timeouts are stored as negative entries with a short TTL.
//!
//! Errors that are neither not-found nor timeouts are returned to the caller
//! and never cached.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod policy;

pub use cache::{FetchOutcome, HandlerCache, Lookup};
pub use policy::{CachePolicy, CachePolicyBuilder, Ttl};
