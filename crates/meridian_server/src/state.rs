//! Shared handler state.

use crate::{BioLookup, RealtimeBus, SpotifyOAuth};
use meridian_database::Database;
use meridian_fetch::{FetcherRegistry, SharedHttp};
use meridian_kv::SharedKv;
use meridian_quota::{AuditSink, QuotaGate, TracingAuditSink};
use meridian_render::RenderPipeline;
use std::sync::Arc;

/// Everything route handlers reach for.
#[derive(Clone)]
pub struct AppState {
    kv: SharedKv,
    quota: Arc<QuotaGate>,
    registry: Arc<FetcherRegistry>,
    bus: Arc<RealtimeBus>,
    bio: Arc<BioLookup>,
    spotify: Arc<SpotifyOAuth>,
    audit: Arc<dyn AuditSink>,
    db: Option<Database>,
    debug: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("quota", &self.quota)
            .field("registry", &self.registry)
            .field("database", &self.db.is_some())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State with a tracing audit sink, no database and no debug output.
    pub fn new(
        kv: SharedKv,
        quota: Arc<QuotaGate>,
        registry: Arc<FetcherRegistry>,
        http: SharedHttp,
        spotify: SpotifyOAuth,
    ) -> Self {
        Self {
            bus: Arc::new(RealtimeBus::new(kv.clone())),
            bio: Arc::new(BioLookup::new(kv.clone(), http, None)),
            spotify: Arc::new(spotify),
            audit: Arc::new(TracingAuditSink),
            db: None,
            debug: false,
            kv,
            quota,
            registry,
        }
    }

    /// Use this bus.
    pub fn with_bus(mut self, bus: Arc<RealtimeBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Use this bio lookup.
    pub fn with_bio(mut self, bio: BioLookup) -> Self {
        self.bio = Arc::new(bio);
        self
    }

    /// Persist slow requests to this sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Attach the relational store.
    pub fn with_database(mut self, db: Option<Database>) -> Self {
        self.db = db;
        self
    }

    /// Include error details in responses.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// KV store.
    pub fn kv(&self) -> &SharedKv {
        &self.kv
    }

    /// Auth and quota gate.
    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    /// Fetcher registry.
    pub fn registry(&self) -> &FetcherRegistry {
        &self.registry
    }

    /// Render pipeline behind the registry.
    pub fn render(&self) -> &RenderPipeline {
        self.registry.context().render()
    }

    /// Realtime bus.
    pub fn bus(&self) -> &Arc<RealtimeBus> {
        &self.bus
    }

    /// Bio lookup.
    pub fn bio(&self) -> &BioLookup {
        &self.bio
    }

    /// Spotify OAuth client.
    pub fn spotify(&self) -> &SpotifyOAuth {
        &self.spotify
    }

    /// Audit sink.
    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    /// Relational store, if configured.
    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Whether error details are returned.
    pub fn debug(&self) -> bool {
        self.debug
    }
}
