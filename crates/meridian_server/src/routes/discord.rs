//! Discord routes: bios, the message cache, snipe clearing and the realtime bus.

use super::{ClientIp, RouteMeta, guarded};
use crate::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{delete, get};
use axum::{Json, Router};
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::{DatabaseError, DatabaseErrorKind, JsonError};
use meridian_database::to_db_id;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const BIO_TIMEOUT: Duration = Duration::from_secs(15);
const SNIPE_TIMEOUT: Duration = Duration::from_secs(10);
const MESSAGE_CACHE_TTL: u64 = 30;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/discord/bio", get(bio))
        .route("/api/discord/messagecache", get(message_cache))
        .route("/api/discord/clearsnipe", delete(clear_snipe))
        .route("/api/discord/ws", get(websocket))
}

#[derive(Debug, Deserialize)]
struct BioQuery {
    user_id: u64,
    #[serde(default)]
    guild_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    message_id: u64,
    #[serde(default)]
    guild_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SnipeQuery {
    channel_id: u64,
}

async fn bio(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Query(query): Query<BioQuery>,
) -> Response {
    let meta = RouteMeta::new("discord.bio")
        .args(json!({ "user_id": query.user_id, "guild_id": query.guild_id }))
        .user_id(Some(query.user_id))
        .timeout(BIO_TIMEOUT);
    let lookup = state.bio();
    guarded(&state, &headers, ip, meta, move |_account| async move {
        lookup.lookup(query.user_id, query.guild_id).await.map(Json)
    })
    .await
}

async fn message_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Query(query): Query<MessageQuery>,
) -> Response {
    let meta = RouteMeta::new("discord.messagecache")
        .args(json!({ "message_id": query.message_id, "guild_id": query.guild_id }));
    let cache = state.registry().cache();
    let db = state.database().cloned();
    guarded(&state, &headers, ip, meta, move |_account| async move {
        let db = db.ok_or_else(|| DatabaseError::new(DatabaseErrorKind::NotConfigured))?;
        let key = format!(
            "messagecache:{}:{}",
            query.message_id,
            query.guild_id.map(|g| g.to_string()).unwrap_or_default()
        );
        let policy = CachePolicy::new(Ttl::secs(MESSAGE_CACHE_TTL))
            .with_negative_ttl(Some(Ttl::secs(MESSAGE_CACHE_TTL)));
        let lookup = cache
            .get_or_fetch::<Value, _, _>(&key, &policy, false, move || async move {
                let row = db
                    .find_message(query.message_id)
                    .await?
                    .filter(|row| query.guild_id.is_none_or(|g| row.guild_id == to_db_id(g)));
                match row {
                    Some(row) => Ok(FetchOutcome::Found(
                        serde_json::to_value(&row).map_err(JsonError::from)?,
                    )),
                    None => Ok(FetchOutcome::NotFound),
                }
            })
            .await?;
        Ok(Json(lookup.value))
    })
    .await
}

async fn clear_snipe(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Query(query): Query<SnipeQuery>,
) -> Response {
    let meta = RouteMeta::new("discord.clearsnipe")
        .args(json!({ "channel_id": query.channel_id }))
        .timeout(SNIPE_TIMEOUT);
    let bus = state.bus();
    guarded(&state, &headers, ip, meta, move |account| async move {
        bus.clear_snipe(query.channel_id, account.name()).await.map(Json)
    })
    .await
}

async fn websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    upgrade: WebSocketUpgrade,
) -> Response {
    let bus = state.bus().clone();
    guarded(&state, &headers, ip, RouteMeta::new("discord.ws"), move |account| async move {
        let name = account.name().clone();
        tracing::info!(account = %name, "Upgrading realtime bus connection");
        Ok(upgrade.on_upgrade(move |socket| bus.serve(socket, name)))
    })
    .await
}
