//! Admin routes: cache invalidation and platform kill switches.

use super::{ClientIp, RouteMeta, guarded};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{delete, put};
use axum::{Json, Router};
use meridian_error::{ApiError, ApiErrorKind, MeridianResult};
use meridian_quota::{ApiAccount, QuotaGate};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const CACHE_DELETE_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/cache/*target", delete(delete_cache))
        .route(
            "/api/admin/platform/:account/:platform",
            put(disable_platform).delete(enable_platform),
        )
}

fn require_admin(quota: &QuotaGate, account: &ApiAccount) -> MeridianResult<()> {
    if quota.is_admin(account) {
        Ok(())
    } else {
        tracing::warn!(account = %account.name(), "Admin route refused");
        Err(ApiError::new(ApiErrorKind::Forbidden(format!("{} is not an admin", account.name()))).into())
    }
}

async fn delete_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(target): Path<String>,
) -> Response {
    let meta = RouteMeta::new("admin.cache")
        .path_args(json!({ "target": target }))
        .timeout(CACHE_DELETE_TIMEOUT);
    let quota = state.quota();
    let objects = state.render().cache();
    let target = target.as_str();
    guarded(&state, &headers, ip, meta, move |account| async move {
        require_admin(quota, &account)?;
        let removed = objects.delete_matching(target).await?;
        tracing::warn!(target, redis = removed.redis, disk = removed.disk, "Cache entries deleted");
        Ok(Json(removed))
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
struct DisableQuery {
    #[serde(default)]
    ttl_secs: Option<u64>,
}

async fn disable_platform(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path((target, platform)): Path<(String, String)>,
    Query(query): Query<DisableQuery>,
) -> Response {
    let meta = RouteMeta::new("admin.platform.disable")
        .path_args(json!({ "account": target, "platform": platform }))
        .args(json!({ "ttl_secs": query.ttl_secs }));
    let quota = state.quota();
    let (target, platform) = (target.as_str(), platform.as_str());
    guarded(&state, &headers, ip, meta, move |account| async move {
        require_admin(quota, &account)?;
        quota
            .disable_platform(target, platform, query.ttl_secs.map(Duration::from_secs))
            .await?;
        Ok(Json(json!({ "account": target, "platform": platform, "disabled": true })))
    })
    .await
}

async fn enable_platform(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path((target, platform)): Path<(String, String)>,
) -> Response {
    let meta = RouteMeta::new("admin.platform.enable")
        .path_args(json!({ "account": target, "platform": platform }));
    let quota = state.quota();
    let (target, platform) = (target.as_str(), platform.as_str());
    guarded(&state, &headers, ip, meta, move |account| async move {
        require_admin(quota, &account)?;
        let removed = quota.enable_platform(target, platform).await?;
        Ok(Json(json!({ "account": target, "platform": platform, "removed": removed })))
    })
    .await
}
