use async_trait::async_trait;
use meridian_browser::{BrowserConfig, ContextPool, ScriptedFactory, ScriptedRoute};
use meridian_cache::HandlerCache;
use meridian_error::{ErrorClass, MeridianResult};
use meridian_fetch::{FetchContext, FetchRequest, FetcherRegistry, HttpResponse, ScriptedHttp};
use meridian_kv::{KvStore, MemoryKv, SharedKv};
use meridian_render::{Download, MediaSource, RenderConfig, RenderPipeline};
use meridian_storage::{FileSystemStorage, ObjectCache, ObjectCacheConfig};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

const CDN: &str = "https://cdn.example/media";

/// Serves a small PNG for every URL.
struct PngSource;

#[async_trait]
impl MediaSource for PngSource {
    async fn download(&self, _url: &str) -> MeridianResult<Download> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 90]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        Ok(Download {
            bytes: out.into_inner(),
            content_type: Some("image/png".into()),
        })
    }
}

struct Harness {
    registry: FetcherRegistry,
    http: Arc<ScriptedHttp>,
    site: ScriptedFactory,
    kv: Arc<MemoryKv>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let shared: SharedKv = kv.clone();
    let disk = Arc::new(FileSystemStorage::new(dir.path()).unwrap());
    let cache = Arc::new(ObjectCache::new(
        disk,
        shared.clone(),
        ObjectCacheConfig::default().with_cdn_base(CDN.to_string()),
    ));
    let render = RenderPipeline::new(cache, shared.clone(), Arc::new(PngSource), RenderConfig::default());

    let http = Arc::new(ScriptedHttp::new());
    let site = ScriptedFactory::new();
    let pool = Arc::new(ContextPool::new(
        Arc::new(site.clone()),
        shared.clone(),
        BrowserConfig::default(),
        None,
    ));
    let cx = FetchContext::new(render, http.clone(), Some(pool), shared.clone());
    let registry = FetcherRegistry::with_defaults(cx, HandlerCache::new(shared));
    Harness {
        registry,
        http,
        site,
        kv,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_unknown_route_is_validation() {
    let h = harness();
    let err = h
        .registry
        .run("myspace.profile", &FetchRequest::new("tom"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[tokio::test]
async fn test_invalid_username_rejected_before_fetch() {
    let h = harness();
    let err = h
        .registry
        .run("instagram.profile", &FetchRequest::new("bad name!"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert!(h.site.navigations().is_empty());
}

#[tokio::test]
async fn test_instagram_post_via_embed_page() {
    let h = harness();
    h.site.route(
        "https://www.instagram.com/p/CxxxxxxxxxY/embed",
        ScriptedRoute::html("<html></html>").with_evaluation(
            "window.__additionalData",
            json!({"extra": {"data": {"shortcode_media": {
                "id": "3187_2211",
                "shortcode": "CxxxxxxxxxY",
                "display_url": "https://scontent.cdninstagram.com/v/full.jpg",
                "display_resources": [
                    {"src": "https://scontent.cdninstagram.com/v/640.jpg", "config_width": 640, "config_height": 800},
                    {"src": "https://scontent.cdninstagram.com/v/1080.jpg", "config_width": 1080, "config_height": 1350}
                ],
                "owner": {"username": "nasa", "is_verified": true},
                "edge_media_to_caption": {"edges": [{"node": {"text": "Pale blue dot"}}]}
            }}}}),
        ),
    );

    let lookup = h
        .registry
        .run(
            "instagram.post",
            &FetchRequest::new("look https://www.instagram.com/p/CxxxxxxxxxY/?igshid=abc"),
        )
        .await
        .unwrap();
    let post = lookup.value;
    assert!(!lookup.from_cache);
    assert_eq!(post["share_url"], "https://www.instagram.com/p/CxxxxxxxxxY");
    assert_eq!(post["author"]["username"], "nasa");
    assert_eq!(post["num_results"], 1);
    let item = &post["items"][0];
    assert_eq!(item["id"], "3187");
    assert_eq!(item["caption"], "Pale blue dot");
    let image = item["image"]["url"].as_str().unwrap();
    assert!(image.starts_with(&format!("{}/Instagram", CDN)), "{image}");
    assert!(image.ends_with(".jpg"));
    assert!(item["preview"]["url"].is_string());
}

#[tokio::test]
async fn test_instagram_profile_missing_is_negative_cached() {
    let h = harness();
    h.site.route(
        "https://www.instagram.com/ghost",
        ScriptedRoute::html("<html></html>").with_response(
            "https://www.instagram.com/api/v1/users/web_profile_info/?username=ghost",
            r#"{"data": {"user": null}}"#,
        ),
    );

    for _ in 0..2 {
        let err = h
            .registry
            .run("instagram.profile", &FetchRequest::new("@Ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }
    assert_eq!(h.site.navigations().len(), 1);
    assert_eq!(h.kv.get("instaprofile:ghost").await.unwrap().as_deref(), Some("null"));
}

#[tokio::test]
async fn test_tiktok_profile_from_rehydration_state() {
    let h = harness();
    let state = json!({"__DEFAULT_SCOPE__": {"webapp.user-detail": {"userInfo": {
        "user": {
            "id": "6614519312189947909",
            "uniqueId": "mrbeast",
            "nickname": "MrBeast",
            "signature": "New video out",
            "avatarLarger": "https://p16-sign-va.tiktokcdn.com/avatar.jpeg",
            "verified": true
        },
        "stats": {"followerCount": 100, "followingCount": 1, "heartCount": 5, "videoCount": 3}
    }}}});
    h.site.route(
        "https://www.tiktok.com/@mrbeast",
        ScriptedRoute::html(format!(
            r#"<html><script id="__UNIVERSAL_DATA_FOR_REHYDRATION__" type="application/json">{}</script></html>"#,
            state
        )),
    );

    let request = FetchRequest::new("@MrBeast");
    let first = h.registry.run("tiktok.profile", &request).await.unwrap();
    assert_eq!(first.value["unique_id"], "mrbeast");
    assert_eq!(first.value["follower_count"], 100);
    assert_eq!(first.value["heart"], 5);
    let avatar = first.value["avatar_url"].as_str().unwrap();
    assert!(avatar.starts_with(&format!("{}/TikTok", CDN)), "{avatar}");
    assert!(avatar.ends_with(".jpg"));

    let second = h.registry.run("tiktok.profile", &request).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.value, first.value);
}

#[tokio::test]
async fn test_pinterest_post_media_served_from_cdn() {
    let h = harness();
    h.http.route(
        "https://www.pinterest.com/resource/PinResource/get/",
        HttpResponse::new(
            200,
            json!({"resource_response": {"data": {
                "id": "1234567890",
                "title": "Cat",
                "images": {
                    "orig": {"url": "https://i.pinimg.com/originals/aa/cat.jpg"},
                    "236x": {"url": "https://i.pinimg.com/236x/aa/cat.jpg"}
                },
                "pinner": {"username": "bob"},
                "tracking_params": "drop-me"
            }}})
            .to_string(),
        ),
    );

    let lookup = h
        .registry
        .run("pinterest.post", &FetchRequest::new("1234567890"))
        .await
        .unwrap();
    let pin = lookup.value;
    assert_eq!(pin["id"], "1234567890");
    assert_eq!(pin["pinner"], "bob");
    let items = pin["items"].as_array().unwrap();
    assert!(!items.is_empty());
    for item in items {
        assert!(item["url"].as_str().unwrap().starts_with(&format!("{}/Pinterest", CDN)));
    }
    assert_eq!(pin["data"]["images"]["orig"]["url"], items[0]["url"]);
    assert!(pin["data"].get("tracking_params").is_none());
}

#[tokio::test]
async fn test_pinterest_missing_pin() {
    let h = harness();
    h.http.route(
        "https://www.pinterest.com/resource/PinResource/get/",
        HttpResponse::new(200, r#"{"resource_response": {"data": null}}"#),
    );
    let err = h
        .registry
        .run("pinterest.post", &FetchRequest::new("42"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn test_telegram_boilerplate_bio_blanked() {
    let h = harness();
    h.http.route(
        "https://t.me/durov",
        HttpResponse::new(
            200,
            r#"<html><head>
            <meta property="og:title" content="Pavel Durov">
            <meta property="og:image" content="https://cdn4.telesco.pe/file/durov.jpg">
            <meta property="og:description" content="You can contact @durov right away.">
            </head></html>"#,
        ),
    );

    let lookup = h
        .registry
        .run("telegram.profile", &FetchRequest::new("Durov"))
        .await
        .unwrap();
    assert_eq!(lookup.value["title"], "Pavel Durov");
    assert!(lookup.value["description"].is_null());
    assert!(
        lookup.value["avatar"]["url"]
            .as_str()
            .unwrap()
            .starts_with(&format!("{}/Telegram", CDN))
    );
}

#[tokio::test]
async fn test_roblox_unknown_user_not_found() {
    let h = harness();
    h.http.route(
        "https://users.roblox.com/v1/usernames/users",
        HttpResponse::new(200, r#"{"data": []}"#),
    );
    let err = h
        .registry
        .run("roblox.profile", &FetchRequest::new("nobody_here"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
    assert_eq!(h.http.count("https://users.roblox.com/v1/users/"), 0);
}

#[tokio::test]
async fn test_roblox_secondary_lookups_best_effort() {
    let h = harness();
    h.http.route(
        "https://users.roblox.com/v1/usernames/users",
        HttpResponse::new(200, r#"{"data": [{"id": 1, "name": "Roblox"}]}"#),
    );
    h.http.route(
        "https://users.roblox.com/v1/users/1",
        HttpResponse::new(
            200,
            r#"{"id": 1, "name": "Roblox", "displayName": "Roblox", "created": "2006-02-27T21:06:40.3Z", "hasVerifiedBadge": true}"#,
        ),
    );
    h.http.route(
        "https://friends.roblox.com/v1/users/1/followers/count",
        HttpResponse::new(200, r#"{"count": 12}"#),
    );

    let lookup = h
        .registry
        .run("roblox.profile", &FetchRequest::new("Roblox"))
        .await
        .unwrap();
    let profile = lookup.value;
    assert_eq!(profile["id"], 1);
    assert_eq!(profile["created"], 1_141_074_400);
    assert_eq!(profile["follower_count"], 12);
    assert!(profile["following_count"].is_null());
    assert!(profile["avatar_url"].is_null());
    assert_eq!(profile["has_verified_badge"], true);
}

#[tokio::test]
async fn test_force_refetches() {
    let h = harness();
    h.http.route(
        "https://t.me/news",
        HttpResponse::new(200, r#"<meta property="og:title" content="News">"#),
    );
    let request = FetchRequest::new("news");
    h.registry.run("telegram.profile", &request).await.unwrap();
    h.registry.run("telegram.profile", &request).await.unwrap();
    h.registry
        .run("telegram.profile", &request.clone().with_force(true))
        .await
        .unwrap();
    assert_eq!(h.http.count("https://t.me/news"), 2);
}
