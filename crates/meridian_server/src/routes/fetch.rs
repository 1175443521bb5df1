//! Platform fetch routes.

use super::{ClientIp, RouteMeta, guarded};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use meridian_cache::Lookup;
use meridian_fetch::FetchRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/instagram/post", post(instagram_post))
        .route("/api/instagram/story/:user", get(instagram_story))
        .route("/api/instagram/highlights/:user", get(instagram_highlights))
        .route("/api/instagram/highlight/:id", get(instagram_highlight))
        .route("/api/instagram/:user", get(instagram_profile))
        .route("/api/threads/post", post(threads_post))
        .route("/api/tiktok/post", post(tiktok_post))
        .route("/api/tiktok/:user", get(tiktok_profile))
        .route("/api/tiktok/:user/recent", get(tiktok_recent))
        .route("/api/tiktok/:user/top", get(tiktok_top))
        .route("/api/pinterest/post", get(pinterest_post))
        .route("/api/pinterest/reverse", post(pinterest_reverse))
        .route("/api/pinterest/:user", get(pinterest_user))
        .route("/api/twitter/:user", get(twitter_profile))
        .route("/api/snap/:user", get(snapchat_profile))
        .route("/api/roblox/:user", get(roblox_profile))
        .route("/api/valorant/:name/:tag", get(valorant_profile))
        .route("/api/onlyfans/:user", get(onlyfans_profile))
        .route("/api/web/telegram/:user", get(telegram_profile))
        .route("/api/cashapp/:user", get(cashapp_profile))
}

#[derive(Debug, Default, Deserialize)]
struct ForceQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct PinQuery {
    url_or_id: String,
}

/// Body of the post routes; `content` may hold free text around the link.
#[derive(Debug, Serialize, Deserialize)]
struct PostBody {
    #[serde(alias = "content")]
    url: String,
    #[serde(default)]
    user_id: Option<u64>,
    #[serde(default)]
    guild_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReverseBody {
    img_url: String,
}

fn cached_json(lookup: Lookup<Value>) -> Response {
    let cache = if lookup.from_cache { "hit" } else { "miss" };
    ([("x-cache", cache)], Json(lookup.value)).into_response()
}

/// Dispatch `request` to the fetcher registered as `route`.
async fn run(
    state: AppState,
    headers: HeaderMap,
    ip: ClientIp,
    route: &'static str,
    request: FetchRequest,
    meta: RouteMeta,
) -> Response {
    let registry = state.registry();
    let platform = registry.get(route).map(|f| f.platform());
    let meta = meta.platform(platform);
    let request = &request;
    guarded(&state, &headers, ip, meta, move |_account| async move {
        registry.run(route, request).await.map(cached_json)
    })
    .await
}

fn post_meta(name: &'static str, body: &PostBody) -> RouteMeta {
    RouteMeta::new(name)
        .user_id(body.user_id)
        .body(serde_json::to_value(body).ok())
}

async fn profile(
    state: AppState,
    headers: HeaderMap,
    ip: ClientIp,
    route: &'static str,
    user: String,
    force: bool,
) -> Response {
    let meta = RouteMeta::new(route)
        .path_args(json!({ "username": user }))
        .args(json!({ "force": force }));
    run(state, headers, ip, route, FetchRequest::new(user).with_force(force), meta).await
}

async fn instagram_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Json(body): Json<PostBody>,
) -> Response {
    let meta = post_meta("instagram.post", &body);
    run(state, headers, ip, "instagram.post", FetchRequest::new(body.url), meta).await
}

async fn instagram_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "instagram.story", user, query.force).await
}

async fn instagram_highlights(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "instagram.highlights", user, query.force).await
}

async fn instagram_highlight(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(id): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "instagram.highlight", id, query.force).await
}

async fn instagram_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "instagram.profile", user, query.force).await
}

async fn threads_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Json(body): Json<PostBody>,
) -> Response {
    let meta = post_meta("threads.post", &body);
    run(state, headers, ip, "threads.post", FetchRequest::new(body.url), meta).await
}

async fn tiktok_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Json(body): Json<PostBody>,
) -> Response {
    let meta = post_meta("tiktok.post", &body);
    run(state, headers, ip, "tiktok.post", FetchRequest::new(body.url), meta).await
}

async fn tiktok_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "tiktok.profile", user, query.force).await
}

async fn listing(
    state: AppState,
    headers: HeaderMap,
    ip: ClientIp,
    route: &'static str,
    user: String,
    query: LimitQuery,
) -> Response {
    let meta = RouteMeta::new(route)
        .path_args(json!({ "username": user }))
        .args(json!({ "limit": query.limit, "force": query.force }));
    let request = FetchRequest::new(user)
        .with_limit(query.limit)
        .with_force(query.force);
    run(state, headers, ip, route, request, meta).await
}

async fn tiktok_recent(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    listing(state, headers, ip, "tiktok.recent", user, query).await
}

async fn tiktok_top(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    listing(state, headers, ip, "tiktok.top", user, query).await
}

async fn pinterest_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Query(query): Query<PinQuery>,
) -> Response {
    let meta = RouteMeta::new("pinterest.post").args(json!({ "url_or_id": query.url_or_id }));
    run(state, headers, ip, "pinterest.post", FetchRequest::new(query.url_or_id), meta).await
}

async fn pinterest_reverse(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Json(body): Json<ReverseBody>,
) -> Response {
    let meta = RouteMeta::new("pinterest.reverse").body(serde_json::to_value(&body).ok());
    run(state, headers, ip, "pinterest.reverse", FetchRequest::new(body.img_url), meta).await
}

async fn pinterest_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "pinterest.user", user, query.force).await
}

async fn twitter_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "twitter.profile", user, query.force).await
}

async fn snapchat_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "snapchat.profile", user, query.force).await
}

async fn roblox_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "roblox.profile", user, query.force).await
}

async fn valorant_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path((name, tag)): Path<(String, String)>,
    Query(query): Query<ForceQuery>,
) -> Response {
    let meta = RouteMeta::new("valorant.profile").path_args(json!({ "name": name, "tag": tag }));
    let request = FetchRequest::new(format!("{}#{}", name, tag)).with_force(query.force);
    run(state, headers, ip, "valorant.profile", request, meta).await
}

async fn onlyfans_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "onlyfans.profile", user, query.force).await
}

async fn telegram_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "telegram.profile", user, query.force).await
}

async fn cashapp_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    profile(state, headers, ip, "cashapp.profile", user, query.force).await
}
