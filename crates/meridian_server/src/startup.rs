//! Service assembly.

use crate::{AppState, BioLookup, MeridianConfig, SpotifyOAuth, router};
use axum::Router;
use meridian_browser::{ChromeFactory, ContextFactory, ContextPool};
use meridian_cache::HandlerCache;
use meridian_database::{Database, PgAuditSink};
use meridian_error::MeridianResult;
use meridian_fetch::{FetchContext, FetcherRegistry, ReqwestClient, SharedHttp};
use meridian_kv::{MemoryKv, RedisKv, SharedKv};
use meridian_moderation::ModerationService;
use meridian_quota::{AuditSink, QuotaGate, TracingAuditSink};
use meridian_render::{HttpSource, RenderPipeline};
use meridian_storage::{FileSystemStorage, ObjectCache};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A fully wired service and its background work.
pub struct Runtime {
    config: MeridianConfig,
    state: AppState,
    objects: Arc<ObjectCache>,
    browser: Option<Arc<ContextPool>>,
    moderation: Option<ModerationService>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state)
            .field("browser", &self.browser.is_some())
            .field("moderation", &self.moderation.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Connect every backing service named in `config`.
    ///
    /// Missing optional services degrade: no `kv.url` uses the in-memory
    /// store, no `database.url` keeps cases in memory, no browser endpoint
    /// disables browser fetchers, no bot token disables moderation.
    #[tracing::instrument(skip_all)]
    pub async fn start(config: MeridianConfig) -> MeridianResult<Self> {
        let kv: SharedKv = match config.kv().url() {
            Some(url) => Arc::new(RedisKv::connect(url).await?),
            None => {
                tracing::warn!("No kv.url configured, using the in-memory store");
                Arc::new(MemoryKv::new())
            }
        };

        let db = match config.database().url() {
            Some(url) => Some(Database::connect(url, *config.database().pool_size()).await?),
            None => {
                tracing::warn!("No database.url configured, message cache disabled");
                None
            }
        };

        let storage = Arc::new(FileSystemStorage::new(config.media().cache_dir())?);
        let objects = Arc::new(ObjectCache::new(
            storage,
            kv.clone(),
            config.media().cache().clone(),
        ));
        let render = RenderPipeline::new(
            objects.clone(),
            kv.clone(),
            Arc::new(HttpSource::new()?),
            config.media().render().clone(),
        );

        let browser = match config.browser().endpoint() {
            Some(endpoint) => {
                let factory: Arc<dyn ContextFactory> = Arc::new(ChromeFactory::connect(endpoint).await?);
                Some(Arc::new(ContextPool::new(
                    factory,
                    kv.clone(),
                    config.browser().clone(),
                    None,
                )))
            }
            None => {
                tracing::warn!("No browser.endpoint configured, browser fetchers disabled");
                None
            }
        };

        let http: SharedHttp = Arc::new(ReqwestClient::new()?);
        let cx = FetchContext::new(render, http.clone(), browser.clone(), kv.clone());
        let registry = Arc::new(FetcherRegistry::with_defaults(cx, HandlerCache::new(kv.clone())));
        let quota = Arc::new(QuotaGate::new(kv.clone(), config.quota().clone()));

        let audit: Arc<dyn AuditSink> = match &db {
            Some(db) => Arc::new(PgAuditSink::new(db.clone())),
            None => Arc::new(TracingAuditSink),
        };
        let spotify = SpotifyOAuth::new(kv.clone(), http.clone(), config.spotify().clone());
        let bio = BioLookup::new(kv.clone(), http.clone(), config.discord().bot_token().clone());
        let moderation = moderation_service(&config, &kv, db.as_ref());

        let state = AppState::new(kv, quota, registry, http, spotify)
            .with_bio(bio)
            .with_audit(audit)
            .with_database(db)
            .with_debug(*config.server().debug());

        tracing::info!(
            routes = state.registry().routes().count(),
            moderation = moderation.is_some(),
            "Runtime assembled"
        );
        Ok(Self {
            config,
            state,
            objects,
            browser,
            moderation,
        })
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router over the handler state.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Moderation service, when a bot token is configured.
    pub fn moderation(&self) -> Option<&ModerationService> {
        self.moderation.as_ref()
    }

    /// Start sweepers, the browser save loop, the moderation timer and
    /// warn queue, and the gateway.
    pub fn spawn_background(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![
            self.objects
                .clone()
                .spawn_sweeper(self.config.media().sweep_interval(), cancel.clone()),
        ];
        if let Some(browser) = &self.browser {
            tasks.push(browser.clone().spawn_save_loop(cancel.clone()));
        }
        if let Some(service) = &self.moderation {
            tasks.push(service.spawn_timer(cancel.clone()));
            tasks.push(service.spawn_warn_queue(cancel.clone()));
            #[cfg(feature = "discord")]
            if let Some(token) = self.config.discord().bot_token() {
                let handler = crate::gateway::ModerationHandler::new(
                    service.clone(),
                    self.state.database().cloned(),
                );
                tasks.push(crate::gateway::spawn_gateway(token.clone(), handler, cancel.clone()));
            }
        }
        tracing::info!(tasks = tasks.len(), "Background tasks started");
        tasks
    }
}

#[cfg(feature = "discord")]
fn moderation_service(
    config: &MeridianConfig,
    kv: &SharedKv,
    db: Option<&Database>,
) -> Option<ModerationService> {
    use meridian_moderation::{MemoryCaseStore, PgCaseStore, SerenityActions, SharedCaseStore, SharedDiscord};

    let token = config.discord().bot_token().as_ref()?;
    let discord: SharedDiscord = Arc::new(SerenityActions::new(Arc::new(serenity::http::Http::new(token))));
    let cases: SharedCaseStore = match db {
        Some(db) => Arc::new(PgCaseStore::new(db.clone())),
        None => {
            tracing::warn!("Moderation cases kept in memory");
            Arc::new(MemoryCaseStore::new())
        }
    };
    Some(ModerationService::new(
        discord,
        cases,
        kv.clone(),
        config.moderation().clone(),
    ))
}

#[cfg(not(feature = "discord"))]
fn moderation_service(
    config: &MeridianConfig,
    _kv: &SharedKv,
    _db: Option<&Database>,
) -> Option<ModerationService> {
    if config.discord().bot_token().is_some() {
        tracing::warn!("discord.bot_token set but the discord feature is disabled");
    }
    None
}
