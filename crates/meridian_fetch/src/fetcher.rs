//! The fetcher interface and the registry routes dispatch through.

use crate::FetchContext;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, HandlerCache, Lookup};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Input to a fetcher: the route's target plus optional parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Username, id, URL or free text containing a URL
    pub target: String,
    /// Result limit, for listing routes
    pub limit: Option<usize>,
    /// Bypass the cache read
    pub force: bool,
}

impl FetchRequest {
    /// Request for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Bypass the cache read.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// One platform resource.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Registry name, `platform.resource`.
    fn route(&self) -> &'static str;

    /// Platform name the quota layer limits on.
    fn platform(&self) -> &'static str;

    /// Caching behaviour.
    fn policy(&self) -> CachePolicy;

    /// Reject malformed input and reduce it to its canonical identifier.
    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String>;

    /// Natural cache key of a canonical identifier.
    fn cache_key(&self, id: &str, request: &FetchRequest) -> String;

    /// Fetch from upstream, rendering media on the way.
    async fn fetch(
        &self,
        cx: &FetchContext,
        id: &str,
        request: &FetchRequest,
    ) -> MeridianResult<FetchOutcome<Value>>;

    /// Adjust a (possibly cached) value before it is returned.
    fn shape(&self, value: Value) -> Value {
        value
    }
}

/// Serialize a typed record into a found outcome.
pub fn found<T: serde::Serialize>(record: &T) -> MeridianResult<FetchOutcome<Value>> {
    let value = serde_json::to_value(record)
        .map_err(|e| FetchError::new(FetchErrorKind::Parse(e.to_string())))?;
    Ok(FetchOutcome::Found(value))
}

/// `platform.resource → Fetcher`, each call wrapped in the handler cache.
#[derive(Clone)]
pub struct FetcherRegistry {
    fetchers: BTreeMap<&'static str, Arc<dyn Fetcher>>,
    cache: HandlerCache,
    cx: FetchContext,
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("routes", &self.fetchers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FetcherRegistry {
    /// Empty registry.
    pub fn new(cx: FetchContext, cache: HandlerCache) -> Self {
        Self {
            fetchers: BTreeMap::new(),
            cache,
            cx,
        }
    }

    /// Registry with every built-in platform fetcher.
    pub fn with_defaults(cx: FetchContext, cache: HandlerCache) -> Self {
        let mut registry = Self::new(cx, cache);
        for fetcher in crate::platforms::all() {
            registry.register(fetcher);
        }
        tracing::info!(routes = registry.fetchers.len(), "Registered fetchers");
        registry
    }

    /// Add or replace a fetcher.
    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.route(), fetcher);
    }

    /// Look up a fetcher.
    pub fn get(&self, route: &str) -> Option<&Arc<dyn Fetcher>> {
        self.fetchers.get(route)
    }

    /// Registered route names.
    pub fn routes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fetchers.keys().copied()
    }

    /// Fetch context.
    pub fn context(&self) -> &FetchContext {
        &self.cx
    }

    /// Handler cache.
    pub fn cache(&self) -> &HandlerCache {
        &self.cache
    }

    /// Validate, canonicalize, then serve from cache or fetch under the
    /// key's single-flight lock.
    #[tracing::instrument(skip(self, request), fields(target = %request.target))]
    pub async fn run(&self, route: &str, request: &FetchRequest) -> MeridianResult<Lookup<Value>> {
        let fetcher = self.get(route).ok_or_else(|| {
            FetchError::new(FetchErrorKind::Validation(format!("unknown route {}", route)))
        })?;

        let id = fetcher.canonicalize(request)?;
        let key = fetcher.cache_key(&id, request);
        let policy = fetcher.policy();

        let lookup = self
            .cache
            .get_or_fetch(&key, &policy, request.force, || fetcher.fetch(&self.cx, &id, request))
            .await?;
        tracing::debug!(key = %key, from_cache = lookup.from_cache, "Fetcher served");
        Ok(Lookup {
            value: fetcher.shape(lookup.value),
            from_cache: lookup.from_cache,
        })
    }
}
