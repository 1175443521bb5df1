//! HTTP routes.
//!
//! Every route runs through [`guarded`] (bearer auth, quota admission, route
//! deadline, audit) or [`public`] (deadline and audit only).

mod admin;
mod discord;
mod fetch;
mod media;
mod spotify;

use crate::{ApiFailure, AppState};
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use meridian_error::{ApiError, ApiErrorKind, MeridianResult};
use meridian_quota::{ApiAccount, RequestAudit};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Deadline of routes that do not set their own.
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(media::routes())
        .merge(fetch::routes())
        .merge(discord::routes())
        .merge(admin::routes())
        .merge(spotify::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let routes: Vec<&str> = state.registry().routes().collect();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "routes": routes,
            "available": state.quota().available(),
        })),
    )
}

/// Caller address: `X-Forwarded-For`, then `X-Real-IP`, then the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let ip = header("x-forwarded-for")
            .or_else(|| header("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            });
        Ok(ClientIp(ip))
    }
}

/// What the audit log and the quota gate need to know about a call.
#[derive(Debug, Clone)]
pub(crate) struct RouteMeta {
    name: &'static str,
    platform: Option<&'static str>,
    timeout: Duration,
    args: Value,
    path_args: Value,
    user_id: Option<u64>,
    body: Option<Value>,
}

impl RouteMeta {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            platform: None,
            timeout: DEFAULT_ROUTE_TIMEOUT,
            args: Value::Null,
            path_args: Value::Null,
            user_id: None,
            body: None,
        }
    }

    pub(crate) fn platform(mut self, platform: Option<&'static str>) -> Self {
        self.platform = platform;
        self
    }

    pub(crate) fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub(crate) fn path_args(mut self, path_args: Value) -> Self {
        self.path_args = path_args;
        self
    }

    pub(crate) fn user_id(mut self, user_id: Option<u64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub(crate) fn body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }
}

async fn within<T>(meta: &RouteMeta, work: impl Future<Output = MeridianResult<T>>) -> MeridianResult<T> {
    tokio::time::timeout(meta.timeout, work)
        .await
        .map_err(|_| ApiError::new(ApiErrorKind::Timeout(meta.name.to_string())))?
}

async fn respond<T: IntoResponse>(
    state: &AppState,
    audit: RequestAudit,
    result: MeridianResult<T>,
) -> Response {
    let request_id = audit.request_id();
    let error = result.as_ref().err().map(|e| e.to_string());
    audit.finish_into(error, state.audit()).await;
    match result {
        Ok(value) => value.into_response(),
        Err(e) => ApiFailure::new(e, request_id, state.debug()).into_response(),
    }
}

/// Run an authenticated route.
pub(crate) async fn guarded<T, F, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    ip: ClientIp,
    meta: RouteMeta,
    handler: F,
) -> Response
where
    T: IntoResponse,
    F: FnOnce(ApiAccount) -> Fut,
    Fut: Future<Output = MeridianResult<T>>,
{
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let account = state.quota().authenticate(header).await;
    let audit = RequestAudit::start(
        meta.name,
        account.as_ref().ok().map(|a| a.name().clone()),
        meta.args.clone(),
        meta.path_args.clone(),
        ip.0,
    )
    .with_user_id(meta.user_id)
    .with_body(meta.body.clone());

    let result = match account {
        Ok(account) => admitted(state, &meta, account, handler).await,
        Err(e) => Err(e),
    };
    respond(state, audit, result).await
}

async fn admitted<T, F, Fut>(
    state: &AppState,
    meta: &RouteMeta,
    account: ApiAccount,
    handler: F,
) -> MeridianResult<T>
where
    F: FnOnce(ApiAccount) -> Fut,
    Fut: Future<Output = MeridianResult<T>>,
{
    within(meta, async move {
        let _permit = state.quota().admit(&account, meta.platform).await?;
        handler(account).await
    })
    .await
}

/// Run a route that needs no token.
pub(crate) async fn public<T, Fut>(state: &AppState, ip: ClientIp, meta: RouteMeta, work: Fut) -> Response
where
    T: IntoResponse,
    Fut: Future<Output = MeridianResult<T>>,
{
    let audit = RequestAudit::start(meta.name, None, meta.args.clone(), meta.path_args.clone(), ip.0)
        .with_user_id(meta.user_id);
    let result = within(&meta, work).await;
    respond(state, audit, result).await
}
