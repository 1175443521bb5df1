//! End-to-end tests of the router over a real listener.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use meridian_cache::{CachePolicy, FetchOutcome, HandlerCache, Ttl};
use meridian_error::{HttpError, MeridianResult};
use meridian_fetch::{FetchContext, FetchRequest, Fetcher, FetcherRegistry, HttpResponse, ScriptedHttp};
use meridian_kv::{KvJsonExt, KvStore, MemoryKv, SharedKv};
use meridian_quota::{ApiAccount, QuotaConfig, QuotaGate};
use meridian_render::{Download, MediaSource, RenderConfig, RenderPipeline};
use meridian_server::spotify::{ExchangeInit, init_key, token_key};
use meridian_server::{AppState, SpotifyConfig, SpotifyOAuth, TokenRecord, router};
use meridian_storage::{FileSystemStorage, ObjectCache, ObjectCacheConfig};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

const ADMIN: &str = "admin-token";
const BOT: &str = "bot-token";
const CDN: &str = "https://cdn.example/media";

struct NoSource;

#[async_trait]
impl MediaSource for NoSource {
    async fn download(&self, url: &str) -> MeridianResult<Download> {
        Err(HttpError::new(format!("offline: {}", url)).into())
    }
}

/// Stands in for the Snapchat fetcher; `ghost` does not exist.
struct FakeSnap {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Fetcher for FakeSnap {
    fn route(&self) -> &'static str {
        "snapchat.profile"
    }

    fn platform(&self) -> &'static str {
        "snapchat"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(300))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        Ok(request.target.to_lowercase())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("fakesnap:{}", id)
    }

    async fn fetch(
        &self,
        _cx: &FetchContext,
        id: &str,
        _request: &FetchRequest,
    ) -> MeridianResult<FetchOutcome<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if id == "ghost" {
            return Ok(FetchOutcome::NotFound);
        }
        Ok(FetchOutcome::Found(json!({ "username": id })))
    }
}

struct Harness {
    base: String,
    client: reqwest::Client,
    state: AppState,
    kv: Arc<MemoryKv>,
    http: Arc<ScriptedHttp>,
    objects: Arc<ObjectCache>,
    calls: Arc<AtomicUsize>,
    _dir: TempDir,
}

impl Harness {
    async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{}", self.base, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    async fn send(&self, method: reqwest::Method, path: &str, token: &str) -> reqwest::Response {
        self.client
            .request(method, format!("{}{}", self.base, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let shared: SharedKv = kv.clone();
    let objects = Arc::new(ObjectCache::new(
        Arc::new(FileSystemStorage::new(dir.path()).unwrap()),
        shared.clone(),
        ObjectCacheConfig::default().with_cdn_base(CDN.to_string()),
    ));
    let render = RenderPipeline::new(
        objects.clone(),
        shared.clone(),
        Arc::new(NoSource),
        RenderConfig::default(),
    );
    let http = Arc::new(ScriptedHttp::new());
    let cx = FetchContext::new(render, http.clone(), None, shared.clone());
    let mut registry = FetcherRegistry::with_defaults(cx, HandlerCache::new(shared.clone()));
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register(Arc::new(FakeSnap {
        calls: calls.clone(),
    }));

    let quota = QuotaConfig::default().with_accounts(vec![
        ApiAccount::new("melanie", ADMIN),
        ApiAccount::new("bot", BOT),
    ]);
    let spotify = SpotifyOAuth::new(
        shared.clone(),
        http.clone(),
        SpotifyConfig::default()
            .with_client_id("client".to_string())
            .with_client_secret("secret".to_string()),
    );
    let state = AppState::new(
        shared.clone(),
        Arc::new(QuotaGate::new(shared.clone(), quota)),
        Arc::new(registry),
        http.clone(),
        spotify,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });

    Harness {
        base: format!("http://{}", addr),
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap(),
        state,
        kv,
        http,
        objects,
        calls,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness().await;
    let response = h.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["routes"].as_array().unwrap().iter().any(|r| r == "snapchat.profile"));
}

#[tokio::test]
async fn test_missing_or_unknown_token_is_unauthorized() {
    let h = harness().await;
    assert_eq!(h.get("/api/snap/kat", None).await.status(), StatusCode::UNAUTHORIZED);
    let response = h.get("/api/snap/kat", Some("wrong")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_fetch_is_served_from_cache() {
    let h = harness().await;
    let first = h.get("/api/snap/Kat", Some(BOT)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "miss");
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["username"], "kat");

    let second = h.get("/api/snap/kat", Some(BOT)).await;
    assert_eq!(second.headers()["x-cache"], "hit");
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    let forced = h.get("/api/snap/kat?force=true", Some(BOT)).await;
    assert_eq!(forced.headers()["x-cache"], "miss");
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_not_found_is_404_and_negative_cached() {
    let h = harness().await;
    let response = h.get("/api/snap/ghost", Some(BOT)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not found");
    assert!(body.get("request_id").is_none());

    assert_eq!(h.get("/api/snap/ghost", Some(BOT)).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_username_is_bad_request() {
    let h = harness().await;
    let response = h.get("/api/instagram/bad%20name!", Some(BOT)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disabled_platform_is_quota_exceeded() {
    let h = harness().await;
    let refused = h
        .send(reqwest::Method::PUT, "/api/admin/platform/bot/snapchat", BOT)
        .await;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    let disabled = h
        .send(reqwest::Method::PUT, "/api/admin/platform/bot/snapchat", ADMIN)
        .await;
    assert_eq!(disabled.status(), StatusCode::OK);
    assert_eq!(
        h.get("/api/snap/kat", Some(BOT)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // Other accounts are unaffected.
    assert_eq!(h.get("/api/snap/kat", Some(ADMIN)).await.status(), StatusCode::OK);

    let enabled = h
        .send(reqwest::Method::DELETE, "/api/admin/platform/bot/snapchat", ADMIN)
        .await;
    let body: Value = enabled.json().await.unwrap();
    assert_eq!(body["removed"], true);
    assert_eq!(h.get("/api/snap/kat", Some(BOT)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cache_delete_requires_admin() {
    let h = harness().await;
    h.get("/api/snap/kat", Some(BOT)).await;
    assert!(h.kv.exists("fakesnap:kat").await.unwrap());

    let refused = h.send(reqwest::Method::DELETE, "/api/admin/cache/kat", BOT).await;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    assert!(h.kv.exists("fakesnap:kat").await.unwrap());

    let deleted = h.send(reqwest::Method::DELETE, "/api/admin/cache/kat", ADMIN).await;
    assert_eq!(deleted.status(), StatusCode::OK);
    let body: Value = deleted.json().await.unwrap();
    assert!(body["redis"].as_u64().unwrap() >= 1);
    assert!(!h.kv.exists("fakesnap:kat").await.unwrap());

    h.get("/api/snap/kat", Some(BOT)).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_media_serves_cached_artifact() {
    let h = harness().await;
    let bytes = b"\xff\xd8\xff\xe0 not really a jpeg".to_vec();
    h.objects
        .put("IGabc123.jpg", &bytes, "image/jpeg", None)
        .await
        .unwrap();

    let response = h.get("/media/IGabc123.jpg", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    assert_eq!(response.bytes().await.unwrap().to_vec(), bytes);

    assert_eq!(h.get("/media/IGmissing.jpg", None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_cache_without_database_is_not_found() {
    let h = harness().await;
    let response = h
        .get("/api/discord/messagecache?message_id=1&guild_id=2", Some(BOT))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_spotify_exchange_rejects_unknown_state() {
    let h = harness().await;
    let response = h.get("/spotify_exchange?state=nope&user_id=7", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_spotify_link_flow() {
    let h = harness().await;
    h.kv
        .set_json(
            &init_key("s1", 7),
            &ExchangeInit {
                state: "s1".into(),
                user_id: 7,
                rebound_url: None,
            },
            Some(Duration::from_secs(600)),
        )
        .await
        .unwrap();
    h.http.route(
        "https://accounts.spotify.com/api/token",
        HttpResponse::new(
            200,
            json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 3600,
                "scope": "user-top-read",
                "token_type": "Bearer"
            })
            .to_string(),
        ),
    );

    let redirect = h.get("/spotify_exchange?state=s1&user_id=7", None).await;
    assert!(redirect.status().is_redirection());
    let location = reqwest::Url::parse(redirect.headers()["location"].to_str().unwrap()).unwrap();
    assert_eq!(location.host_str(), Some("accounts.spotify.com"));
    let auth_state = location
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let callback = h
        .get(&format!("/sp_callback?code=abc&state={}", auth_state), None)
        .await;
    assert_eq!(callback.status(), StatusCode::OK);
    let body: Value = callback.json().await.unwrap();
    assert_eq!(body["connected"], true);

    // The pending state is single use.
    let replay = h
        .get(&format!("/sp_callback?code=abc&state={}", auth_state), None)
        .await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);

    let token = h.get("/api/spotify/token/7", Some(BOT)).await;
    assert_eq!(token.status(), StatusCode::OK);
    let record: TokenRecord = token.json().await.unwrap();
    assert_eq!(record.access_token, "access-1");
    assert_eq!(record.refresh_token, "refresh-1");
}

#[tokio::test]
async fn test_spotify_unknown_token_is_not_found() {
    let h = harness().await;
    assert_eq!(
        h.get("/api/spotify/token/99", Some(BOT)).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_spotify_rejected_refresh_revokes() {
    let h = harness().await;
    let stale = TokenRecord {
        access_token: "old".into(),
        refresh_token: "refresh".into(),
        expires_at: 0,
        scope: String::new(),
        token_type: "Bearer".into(),
    };
    h.kv.set_json(&token_key(7), &stale, None).await.unwrap();
    h.http.route(
        "https://accounts.spotify.com/api/token",
        HttpResponse::new(400, r#"{"error":"invalid_grant"}"#),
    );

    let response = h.get("/api/spotify/token/7", Some(BOT)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "auth revoked");
    assert!(!h.kv.exists(&token_key(7)).await.unwrap());
}

#[tokio::test]
async fn test_clear_snipe_over_websocket() {
    let h = harness().await;
    let url = format!("{}/api/discord/ws", h.base.replacen("http", "ws", 1));
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", BOT).parse().unwrap());
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    for _ in 0..100 {
        if h.state.bus().accounts().contains(&"bot".to_string()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.state.bus().accounts(), vec!["bot".to_string()]);

    let client = h.client.clone();
    let clear_url = format!("{}/api/discord/clearsnipe?channel_id=900", h.base);
    let clear = tokio::spawn(async move {
        client
            .delete(clear_url)
            .bearer_auth(ADMIN)
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap()
    });

    let frame = loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => break serde_json::from_str::<Value>(text.as_str()).unwrap(),
            _ => continue,
        }
    };
    assert_eq!(frame["op"], "SNIPEDEL");
    assert_eq!(frame["data"]["channel_id"], 900);
    assert_eq!(frame["data"]["api_username"], "melanie");
    let sig = frame["data"]["sig"].as_str().unwrap().to_string();

    let ack = json!({ "op": "SNIPEDEL_ACK", "data": { "sig": sig, "deleted_items": 3 } });
    socket.send(Message::text(ack.to_string())).await.unwrap();

    let confirmation = clear.await.unwrap();
    assert_eq!(confirmation["confirmed"], true);
    assert_eq!(confirmation["confirmed_by"], json!(["bot"]));
    assert_eq!(confirmation["deleted_items"], 3);
}
