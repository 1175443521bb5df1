//! Cached artifact serving.

use super::{ClientIp, RouteMeta, public};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use meridian_error::{ApiError, ApiErrorKind};
use meridian_storage::mime_for_filename;
use serde_json::json;
use std::time::Duration;

const MEDIA_TIMEOUT: Duration = Duration::from_secs(120);

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/media/:filename", get(artifact))
}

async fn artifact(
    State(state): State<AppState>,
    ip: ClientIp,
    Path(filename): Path<String>,
) -> Response {
    let meta = RouteMeta::new("media")
        .path_args(json!({ "filename": filename }))
        .timeout(MEDIA_TIMEOUT);
    let render = state.render();
    let name = filename.as_str();
    public(&state, ip, meta, async move {
        let artifact = render
            .fetch_artifact(name)
            .await?
            .ok_or_else(|| ApiError::new(ApiErrorKind::NotFound(name.to_string())))?;
        let mime = if artifact.mime.is_empty() {
            mime_for_filename(name)
        } else {
            artifact.mime
        };
        Ok((
            [
                (CONTENT_TYPE, mime),
                (CACHE_CONTROL, "public, max-age=86400".to_string()),
            ],
            artifact.bytes,
        )
            .into_response())
    })
    .await
}
