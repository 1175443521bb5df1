//! Background render pipeline with single-flight per filename.

use crate::payload::{check_payload, reencode_jpeg};
use crate::{Ffmpeg, MediaSource, RenderConfig};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use meridian_error::{MeridianError, MeridianErrorKind, MeridianResult, RenderError, RenderErrorKind};
use meridian_kv::SharedKv;
use meridian_storage::{Artifact, MediaType, ObjectCache, artifact_filename, is_heic_url};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// KV hash mapping passive filenames to their source URL.
pub const PASSIVE_URL_KEY: &str = "api_passive_url";

/// KV prefix of negative render entries.
pub const RENDER_FAILED_PREFIX: &str = "render_failed:";

type Pending = Shared<BoxFuture<'static, Result<String, RenderErrorKind>>>;

/// Artist and title written into rendered audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTags {
    /// ARTIST tag
    pub artist: String,
    /// TITLE tag
    pub title: String,
}

/// What to render and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    url: String,
    tag: String,
    kind: MediaType,
    passive: bool,
    prekey: Option<String>,
    suffix: Option<String>,
    ttl: Option<Duration>,
    filename: Option<String>,
    audio_tags: Option<AudioTags>,
}

impl RenderRequest {
    /// Render `url` under the platform tag `tag`.
    pub fn new(url: impl Into<String>, tag: impl Into<String>, kind: MediaType) -> Self {
        Self {
            url: url.into(),
            tag: tag.into(),
            kind,
            passive: false,
            prekey: None,
            suffix: None,
            ttl: None,
            filename: None,
            audio_tags: None,
        }
    }

    /// An image render.
    pub fn image(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::new(url, tag, MediaType::Image)
    }

    /// A video render.
    pub fn video(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::new(url, tag, MediaType::Video)
    }

    /// Callers will not await the handle.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Hash `prekey` instead of the URL.
    pub fn with_prekey(mut self, prekey: impl Into<String>) -> Self {
        self.prekey = Some(prekey.into());
        self
    }

    /// Force the file suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Artifact TTL instead of the cache default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Store under an explicit filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Tag the rendered audio.
    pub fn with_audio_tags(mut self, artist: impl Into<String>, title: impl Into<String>) -> Self {
        self.audio_tags = Some(AudioTags {
            artist: artist.into(),
            title: title.into(),
        });
        self
    }

    /// Source URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Media kind.
    pub fn kind(&self) -> MediaType {
        self.kind
    }

    /// Whether the render is passive.
    pub fn is_passive(&self) -> bool {
        self.passive
    }

    /// Cache filename this request renders to.
    pub fn filename(&self) -> String {
        match &self.filename {
            Some(name) => name.clone(),
            None => artifact_filename(
                &self.tag,
                &self.url,
                self.prekey.as_deref(),
                self.suffix.as_deref(),
                self.kind,
            ),
        }
    }
}

enum HandleState {
    Ready,
    Failed(RenderErrorKind),
    Pending(Pending),
}

/// A started render. The filename and URL are known before the render ends.
pub struct RenderHandle {
    filename: String,
    url: String,
    state: HandleState,
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            HandleState::Ready => "ready",
            HandleState::Failed(_) => "failed",
            HandleState::Pending(_) => "pending",
        };
        f.debug_struct("RenderHandle")
            .field("filename", &self.filename)
            .field("state", &state)
            .finish()
    }
}

impl RenderHandle {
    /// Cache filename.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Public URL the artifact is (or will be) served from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the artifact was already cached when the render started.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready)
    }

    /// Wait for the render to finish and return the public URL.
    pub async fn wait(self) -> MeridianResult<String> {
        match self.state {
            HandleState::Ready => Ok(self.url),
            HandleState::Failed(kind) => Err(RenderError::new(kind).into()),
            HandleState::Pending(pending) => pending
                .await
                .map_err(|kind| MeridianError::from(RenderError::new(kind))),
        }
    }
}

struct Inner {
    cache: Arc<ObjectCache>,
    kv: SharedKv,
    source: Arc<dyn MediaSource>,
    ffmpeg: Option<Ffmpeg>,
    config: RenderConfig,
    permits: Semaphore,
    inflight: Mutex<HashMap<String, Pending>>,
}

/// Downloads, validates and transcodes remote media into the object cache.
#[derive(Clone)]
pub struct RenderPipeline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("config", &self.inner.config)
            .field("inflight", &self.inner.inflight.lock().len())
            .finish_non_exhaustive()
    }
}

fn failed_key(filename: &str) -> String {
    format!("{}{}", RENDER_FAILED_PREFIX, filename)
}

fn render_kind(err: MeridianError, fallback: fn(String) -> RenderErrorKind) -> RenderErrorKind {
    match err.kind() {
        MeridianErrorKind::Render(r) => r.kind.clone(),
        _ => fallback(err.to_string()),
    }
}

impl RenderPipeline {
    /// Create a pipeline writing into `cache`.
    pub fn new(
        cache: Arc<ObjectCache>,
        kv: SharedKv,
        source: Arc<dyn MediaSource>,
        config: RenderConfig,
    ) -> Self {
        let ffmpeg = config
            .ffmpeg_path()
            .as_ref()
            .map(|path| Ffmpeg::new(path.clone(), *config.ffmpeg_concurrency()));
        tracing::info!(
            render_concurrency = config.render_concurrency(),
            ffmpeg = ffmpeg.is_some(),
            "Creating render pipeline"
        );
        Self {
            inner: Arc::new(Inner {
                permits: Semaphore::new((*config.render_concurrency()).max(1)),
                cache,
                kv,
                source,
                ffmpeg,
                config,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Object cache the pipeline writes into.
    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.inner.cache
    }

    /// Number of renders currently in flight.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Start rendering and return at once with the filename and a handle.
    #[tracing::instrument(skip(self, request), fields(url = %request.url))]
    pub async fn start(&self, request: RenderRequest) -> MeridianResult<RenderHandle> {
        if request.kind == MediaType::Image && is_heic_url(&request.url) {
            tracing::debug!("Refusing HEIC source");
            return Err(RenderError::new(RenderErrorKind::HeicRejected(request.url.clone())).into());
        }

        let filename = request.filename();
        let url = self.inner.cache.url_for(&filename);
        let handle = |state| RenderHandle {
            filename: filename.clone(),
            url: url.clone(),
            state,
        };

        if self.inner.cache.has(&filename).await? {
            tracing::debug!(filename = %filename, "Artifact already cached");
            return Ok(handle(HandleState::Ready));
        }

        if self.inner.kv.exists(&failed_key(&filename)).await? {
            tracing::debug!(filename = %filename, "Render negatively cached");
            return Ok(handle(HandleState::Failed(RenderErrorKind::NegativeCached(
                filename.clone(),
            ))));
        }

        if request.passive {
            self.inner
                .kv
                .hset(PASSIVE_URL_KEY, &filename, &request.url)
                .await?;
            self.inner
                .kv
                .expire(PASSIVE_URL_KEY, self.inner.config.passive_url_ttl())
                .await?;
        }

        let pending = {
            let mut inflight = self.inner.inflight.lock();
            let running = inflight
                .get(&filename)
                .filter(|pending| pending.peek().is_none())
                .cloned();
            if let Some(pending) = running {
                tracing::debug!(filename = %filename, "Joining in-flight render");
                pending
            } else {
                let inner = self.inner.clone();
                let name = filename.clone();
                let pending = async move { inner.render_now(request, name).await }
                    .boxed()
                    .shared();
                inflight.insert(filename.clone(), pending.clone());

                let inner = self.inner.clone();
                let driver = pending.clone();
                let name = filename.clone();
                tokio::spawn(async move {
                    let _ = driver.clone().await;
                    let mut inflight = inner.inflight.lock();
                    if inflight.get(&name).is_some_and(|p| p.ptr_eq(&driver)) {
                        inflight.remove(&name);
                    }
                });
                pending
            }
        };

        Ok(handle(HandleState::Pending(pending)))
    }

    /// Start a render and wait for it.
    pub async fn render(&self, request: RenderRequest) -> MeridianResult<String> {
        self.start(request).await?.wait().await
    }

    /// Start a render and return only its filename.
    pub async fn start_passive(&self, request: RenderRequest) -> MeridianResult<String> {
        let handle = self.start(request.passive()).await?;
        Ok(handle.filename)
    }

    /// Resolve an artifact for serving: cached bytes, else the in-flight
    /// render, else an on-demand render of a recorded passive URL.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_artifact(&self, filename: &str) -> MeridianResult<Option<Artifact>> {
        if let Some(artifact) = self.inner.cache.get(filename).await? {
            return Ok(Some(artifact));
        }

        let pending = self.inner.inflight.lock().get(filename).cloned();
        if let Some(pending) = pending {
            tracing::debug!("Waiting for in-flight render");
            pending
                .await
                .map_err(|kind| MeridianError::from(RenderError::new(kind)))?;
            if let Some(artifact) = self.inner.cache.get(filename).await? {
                return Ok(Some(artifact));
            }
        }

        let Some(source_url) = self.inner.kv.hget(PASSIVE_URL_KEY, filename).await? else {
            return Ok(None);
        };
        let Some(kind) = MediaType::from_filename(filename) else {
            return Ok(None);
        };

        tracing::info!(source_url = %source_url, "Rendering passive artifact on demand");
        let request = RenderRequest::new(source_url, "", kind).with_filename(filename);
        self.render(request).await?;
        self.inner.cache.get(filename).await
    }
}

impl Inner {
    fn timeout_for(&self, kind: MediaType) -> Duration {
        match kind {
            MediaType::Image => Duration::from_secs(*self.config.image_timeout_secs()),
            MediaType::Audio | MediaType::Video => {
                Duration::from_secs(*self.config.video_timeout_secs())
            }
        }
    }

    #[tracing::instrument(skip(self, request), fields(kind = %request.kind))]
    async fn render_now(
        self: Arc<Self>,
        request: RenderRequest,
        filename: String,
    ) -> Result<String, RenderErrorKind> {
        let deadline = self.timeout_for(request.kind);
        let result = match tokio::time::timeout(deadline, self.produce(&request, &filename)).await {
            Ok(result) => result,
            Err(_) => Err(RenderErrorKind::Timeout(format!(
                "{} after {}s",
                filename,
                deadline.as_secs()
            ))),
        };

        if let Err(kind) = &result {
            tracing::warn!(error = %kind, "Render failed");
            let marker = kind.to_string();
            if let Err(e) = self
                .kv
                .set(&failed_key(&filename), &marker, Some(self.config.negative_ttl()))
                .await
            {
                tracing::error!(error = %e, "Could not record failed render");
            }
        }
        result
    }

    async fn produce(&self, request: &RenderRequest, filename: &str) -> Result<String, RenderErrorKind> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RenderErrorKind::Store("render pool closed".into()))?;

        if self
            .cache
            .has(filename)
            .await
            .map_err(|e| render_kind(e, RenderErrorKind::Store))?
        {
            return Ok(self.cache.url_for(filename));
        }

        let download = self
            .source
            .download(&request.url)
            .await
            .map_err(|e| render_kind(e, RenderErrorKind::Download))?;
        let checked = check_payload(&download.bytes, request.kind, filename)
            .map_err(|e| render_kind(e, RenderErrorKind::InvalidPayload))?;

        let mut bytes = download.bytes;
        if checked.needs_jpeg {
            tracing::debug!("Re-encoding image to JPEG");
            bytes = reencode_jpeg(bytes)
                .await
                .map_err(|e| render_kind(e, RenderErrorKind::Transcode))?;
        }

        if let Some(ffmpeg) = &self.ffmpeg {
            match request.kind {
                MediaType::Video if checked.mime == "video/mp4" => {
                    bytes = ffmpeg
                        .faststart(&bytes)
                        .await
                        .map_err(|e| render_kind(e, RenderErrorKind::Transcode))?;
                }
                MediaType::Audio => {
                    if let Some(tags) = &request.audio_tags {
                        bytes = ffmpeg
                            .tag_audio(&bytes, &tags.artist, &tags.title)
                            .await
                            .map_err(|e| render_kind(e, RenderErrorKind::Transcode))?;
                    }
                }
                _ => {}
            }
        }

        let url = self
            .cache
            .put(filename, &bytes, &checked.mime, request.ttl)
            .await
            .map_err(|e| render_kind(e, RenderErrorKind::Store))?;
        tracing::info!(filename, size = bytes.len(), "Rendered artifact");
        Ok(url)
    }
}
