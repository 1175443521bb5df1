//! Spotify linking routes.

use super::{ClientIp, RouteMeta, guarded, public};
use crate::AppState;
use crate::spotify::CallbackOutcome;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/spotify_exchange", get(exchange))
        .route("/sp_callback", get(callback))
        .route("/api/spotify/token/:user_id", get(token))
}

#[derive(Debug, Deserialize)]
struct ExchangeQuery {
    state: String,
    user_id: u64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

async fn exchange(
    State(state): State<AppState>,
    ip: ClientIp,
    Query(query): Query<ExchangeQuery>,
) -> Response {
    let meta = RouteMeta::new("spotify.exchange")
        .args(json!({ "state": query.state }))
        .user_id(Some(query.user_id));
    let spotify = state.spotify();
    public(&state, ip, meta, async move {
        let url = spotify.exchange(&query.state, query.user_id).await?;
        Ok(Redirect::to(&url))
    })
    .await
}

async fn callback(
    State(state): State<AppState>,
    ip: ClientIp,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let meta = RouteMeta::new("spotify.callback");
    let spotify = state.spotify();
    public(&state, ip, meta, async move {
        let outcome = spotify.callback(&query.code, &query.state).await?;
        Ok(match outcome {
            CallbackOutcome::Redirect(url) => Redirect::to(&url).into_response(),
            CallbackOutcome::Connected => Json(json!({ "connected": true })).into_response(),
        })
    })
    .await
}

async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    ip: ClientIp,
    Path(user_id): Path<u64>,
) -> Response {
    let meta = RouteMeta::new("spotify.token")
        .path_args(json!({ "user_id": user_id }))
        .user_id(Some(user_id));
    let spotify = state.spotify();
    guarded(&state, &headers, ip, meta, move |_account| async move {
        spotify.token(user_id).await.map(Json)
    })
    .await
}
