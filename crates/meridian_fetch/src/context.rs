//! Collaborators shared by every fetcher.

use crate::http::{HttpRequest, HttpResponse, SharedHttp};
use crate::records::MediaRef;
use meridian_browser::{ContextPool, PageLease};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use meridian_kv::SharedKv;
use meridian_render::{RenderPipeline, RenderRequest, Rendition, principal_and_preview};
use meridian_storage::MediaType;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// What a fetcher may use: the render pipeline, direct HTTP, the browser
/// pool, and the KV store.
#[derive(Clone)]
pub struct FetchContext {
    render: RenderPipeline,
    http: SharedHttp,
    browser: Option<Arc<ContextPool>>,
    kv: SharedKv,
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("render", &self.render)
            .field("browser", &self.browser.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchContext {
    /// Assemble a context.
    pub fn new(
        render: RenderPipeline,
        http: SharedHttp,
        browser: Option<Arc<ContextPool>>,
        kv: SharedKv,
    ) -> Self {
        Self {
            render,
            http,
            browser,
            kv,
        }
    }

    /// Render pipeline.
    pub fn render(&self) -> &RenderPipeline {
        &self.render
    }

    /// KV store.
    pub fn kv(&self) -> &SharedKv {
        &self.kv
    }

    /// HTTP client.
    pub fn http(&self) -> &SharedHttp {
        &self.http
    }

    /// Browser pool, failing when none is configured.
    pub fn browser(&self) -> MeridianResult<&Arc<ContextPool>> {
        self.browser.as_ref().ok_or_else(|| {
            FetchError::new(FetchErrorKind::Disabled("no browser endpoint configured".into())).into()
        })
    }

    /// Borrow an anonymous page (optionally through a proxy).
    pub async fn page(&self, proxy: bool) -> MeridianResult<PageLease> {
        self.browser()?.borrow(None, proxy).await
    }

    /// Borrow a page from an authenticated account.
    pub async fn logged_in_page(&self) -> MeridianResult<PageLease> {
        self.browser()?.borrow_any_account().await
    }

    /// Send a request.
    pub async fn send(&self, request: HttpRequest) -> MeridianResult<HttpResponse> {
        self.http.send(request).await
    }

    /// GET a page and return its body, mapping 404 to not-found and other
    /// failures to upstream errors.
    pub async fn get_text(&self, url: &str) -> MeridianResult<String> {
        let response = self
            .send(HttpRequest::get(url).header("Accept", "text/html,application/xhtml+xml"))
            .await?;
        check_status(url, &response)?;
        Ok(response.text())
    }

    /// GET and parse a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> MeridianResult<T> {
        let response = self
            .send(HttpRequest::get(url).header("Accept", "application/json"))
            .await?;
        check_status(url, &response)?;
        response.json()
    }

    /// Where `url` redirects to, or `url` itself.
    pub async fn resolve_redirect(&self, url: &str) -> MeridianResult<String> {
        let response = self.send(HttpRequest::get(url).no_redirect()).await?;
        match response.location {
            Some(location) => {
                tracing::debug!(from = url, to = %location, "Resolved redirect");
                Ok(location)
            }
            None => Ok(url.to_string()),
        }
    }

    /// Render and wait: for principal media and previews.
    pub async fn render_now(&self, request: RenderRequest) -> MeridianResult<MediaRef> {
        let handle = self.render.start(request).await?;
        let media = MediaRef {
            filename: handle.filename().to_string(),
            url: handle.url().to_string(),
        };
        handle.wait().await?;
        Ok(media)
    }

    /// Start a passive render: for secondary media.
    pub async fn render_passive(&self, request: RenderRequest) -> MeridianResult<MediaRef> {
        let handle = self.render.start(request.passive()).await?;
        Ok(MediaRef {
            filename: handle.filename().to_string(),
            url: handle.url().to_string(),
        })
    }

    /// Image render of `url` under `tag`, awaited.
    pub async fn image(&self, url: &str, tag: &str) -> MeridianResult<MediaRef> {
        self.render_now(RenderRequest::image(url, tag).with_suffix(".jpg")).await
    }

    /// Image render of `url` under `tag`, passive.
    pub async fn image_passive(&self, url: &str, tag: &str) -> MeridianResult<MediaRef> {
        self.render_passive(RenderRequest::image(url, tag).with_suffix(".jpg"))
            .await
    }

    /// Best-effort image: failures are logged and yield `None`.
    pub async fn try_image(&self, url: Option<&str>, tag: &str, passive: bool) -> Option<MediaRef> {
        let url = url.filter(|u| !u.is_empty())?;
        let result = if passive {
            self.image_passive(url, tag).await
        } else {
            self.image(url, tag).await
        };
        match result {
            Ok(media) => Some(media),
            Err(e) => {
                tracing::warn!(url, error = %e, "Image render failed");
                None
            }
        }
    }

    /// Video render of `url` under `tag`, awaited.
    pub async fn video(&self, url: &str, tag: &str, prekey: Option<&str>) -> MeridianResult<MediaRef> {
        let mut request = RenderRequest::new(url, tag, MediaType::Video).with_suffix(".mp4");
        if let Some(prekey) = prekey {
            request = request.with_prekey(prekey);
        }
        self.render_now(request).await
    }

    /// Video render of `url` under `tag`, passive.
    pub async fn video_passive(&self, url: &str, tag: &str) -> MeridianResult<MediaRef> {
        self.render_passive(RenderRequest::video(url, tag).with_suffix(".mp4"))
            .await
    }

    /// From a set of renditions, render the principal (passive or awaited)
    /// and the preview (always awaited).
    pub async fn renditions(
        &self,
        renditions: &[Rendition],
        tag: &str,
        passive_principal: bool,
    ) -> MeridianResult<(Option<MediaRef>, Option<MediaRef>)> {
        let Some((principal, preview)) = principal_and_preview(renditions) else {
            return Ok((None, None));
        };
        let principal = if passive_principal {
            self.image_passive(&principal.url, tag).await?
        } else {
            self.image(&principal.url, tag).await?
        };
        let preview = self.image(&preview.url, tag).await?;
        Ok((Some(principal), Some(preview)))
    }
}

/// Map an HTTP status onto the fetch error taxonomy.
pub fn check_status(url: &str, response: &HttpResponse) -> MeridianResult<()> {
    match response.status {
        s if (200..300).contains(&s) => Ok(()),
        404 | 410 => Err(FetchError::new(FetchErrorKind::NotFound(url.to_string())).into()),
        s => Err(FetchError::new(FetchErrorKind::Upstream(format!("{} returned {}", url, s))).into()),
    }
}

/// Not-found error for `what`.
pub fn not_found(what: impl Into<String>) -> meridian_error::MeridianError {
    FetchError::new(FetchErrorKind::NotFound(what.into())).into()
}

/// Schema error for `what`.
pub fn parse_error(what: impl Into<String>) -> meridian_error::MeridianError {
    FetchError::new(FetchErrorKind::Parse(what.into())).into()
}
