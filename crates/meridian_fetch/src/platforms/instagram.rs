//! Instagram posts, profiles, stories and highlights.

use crate::canonical::{INSTAGRAM_USERNAME, canonical_instagram_url, find_link, validate_numeric_id, validate_username};
use crate::context::{not_found, parse_error};
use crate::embedded::{find_all, json_script_containing};
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::platforms::threads;
use crate::records::{Author, CarouselMedia, MediaRef, PostItem, PostRecord, carousel_preview_index};
use crate::FetchContext;
use async_trait::async_trait;
use meridian_browser::PageLease;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use meridian_render::Rendition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "Instagram";
const PLATFORM: &str = "instagram";
const BROKEN_LINK: &str = "The link you followed may be broken";
const UNAVAILABLE: &str = "Sorry, this page isn't available";
const INTERCEPT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
struct Count {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct Resource {
    src: String,
    #[serde(default)]
    config_width: u32,
    #[serde(default)]
    config_height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct CaptionEdges {
    #[serde(default)]
    edges: Vec<CaptionEdge>,
}

#[derive(Debug, Deserialize)]
struct CaptionEdge {
    node: CaptionNode,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    #[serde(default)]
    text: String,
}

impl CaptionEdges {
    fn first(&self) -> Option<String> {
        self.edges.first().map(|e| e.node.text.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Owner {
    username: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    profile_pic_url: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_verified: bool,
}

#[derive(Debug, Deserialize)]
struct SidecarEdges {
    #[serde(default)]
    edges: Vec<SidecarEdge>,
}

#[derive(Debug, Deserialize)]
struct SidecarEdge {
    node: SidecarNode,
}

#[derive(Debug, Deserialize)]
struct SidecarNode {
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    display_url: Option<String>,
    #[serde(default)]
    display_resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct ShortcodeMedia {
    id: String,
    shortcode: String,
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    display_url: Option<String>,
    #[serde(default)]
    display_resources: Vec<Resource>,
    owner: Owner,
    #[serde(default)]
    edge_media_to_caption: CaptionEdges,
    #[serde(default, alias = "edge_media_preview_like")]
    edge_liked_by: Option<Count>,
    #[serde(default, alias = "edge_media_to_parent_comment")]
    edge_media_to_comment: Option<Count>,
    #[serde(default)]
    taken_at_timestamp: Option<i64>,
    #[serde(default)]
    video_view_count: Option<u64>,
    #[serde(default)]
    edge_sidecar_to_children: Option<SidecarEdges>,
}

fn renditions(resources: &[Resource]) -> Vec<Rendition> {
    resources
        .iter()
        .map(|r| Rendition::new(r.src.clone(), r.config_width, r.config_height))
        .collect()
}

/// Fail with an upstream error when the page landed on the login wall, so
/// the session is renewed and nothing is cached.
async fn check_login_wall(cx: &FetchContext, lease: &PageLease) -> MeridianResult<()> {
    let url = lease.current_url().await?;
    if url.contains("/accounts/login") || url.contains("/challenge/") {
        tracing::warn!(account = ?lease.account(), "Landed on login wall");
        if lease.account().is_some() {
            cx.browser()?.report_auth_failure(lease).await?;
        }
        return Err(FetchError::new(FetchErrorKind::Upstream("session redirected to login".into())).into());
    }
    Ok(())
}

async fn check_missing(lease: &PageLease, what: &str) -> MeridianResult<()> {
    let html = lease.content().await?;
    if html.contains(BROKEN_LINK) || html.contains(UNAVAILABLE) || html.contains("Page not found") {
        return Err(not_found(what));
    }
    Ok(())
}

/// The embed page exposes the post as `window.__additionalData`.
async fn embed_media(cx: &FetchContext, url: &str) -> MeridianResult<Option<ShortcodeMedia>> {
    let lease = cx.page(true).await?;
    lease.navigate(&format!("{}/embed/captioned", url)).await?;
    let data = lease.evaluate("window.__additionalData").await?;
    let media = data
        .pointer("/extra/data/shortcode_media")
        .filter(|v| !v.is_null())
        .cloned();
    match media {
        Some(media) => {
            tracing::debug!(url, "Post resolved via embed page");
            Ok(Some(serde_json::from_value(media).map_err(|e| parse_error(e.to_string()))?))
        }
        None => Ok(None),
    }
}

/// Fallback: intercept the post page's own GraphQL query.
async fn graphql_media(cx: &FetchContext, url: &str) -> MeridianResult<ShortcodeMedia> {
    let lease = cx.page(true).await?;
    let mut interceptor = lease.intercept("graphql/query").await?;
    lease.navigate(&format!("{}/", url)).await?;
    check_missing(&lease, url).await?;

    let deadline = tokio::time::Instant::now() + INTERCEPT_WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let response = interceptor.next(remaining).await?;
        let Ok(doc) = response.json() else { continue };
        let media = doc
            .pointer("/data/xdt_shortcode_media")
            .or_else(|| doc.pointer("/data/shortcode_media"));
        match media {
            Some(Value::Null) => return Err(not_found(url)),
            Some(media) => {
                return serde_json::from_value(media.clone()).map_err(|e| parse_error(e.to_string()));
            }
            None => continue,
        }
    }
}

async fn post_record(cx: &FetchContext, media: ShortcodeMedia) -> MeridianResult<PostRecord> {
    let author = Author {
        avatar: cx.try_image(media.owner.profile_pic_url.as_deref(), TAG, true).await,
        username: media.owner.username,
        display_name: media.owner.full_name,
        is_private: media.owner.is_private,
        is_verified: media.owner.is_verified,
    };

    let mut item = PostItem {
        id: media.id,
        is_video: media.is_video,
        caption: media.edge_media_to_caption.first(),
        taken_at: media.taken_at_timestamp,
        like_count: media.edge_liked_by.map(|c| c.count),
        comment_count: media.edge_media_to_comment.map(|c| c.count),
        view_count: media.video_view_count,
        ..Default::default()
    };

    match (&media.video_url, &media.display_url) {
        (Some(video), _) if media.is_video => {
            item.video = Some(cx.video(video, TAG, None).await?);
        }
        (_, Some(display)) => {
            item.image = Some(cx.image(display, TAG).await?);
        }
        _ => {}
    }
    let (_, preview) = cx.renditions(&renditions(&media.display_resources), TAG, true).await?;
    item.preview = preview;

    if let Some(children) = media.edge_sidecar_to_children {
        for edge in children.edges {
            let node = edge.node;
            let media = match (&node.video_url, &node.display_url) {
                (Some(video), _) if node.is_video => Some(cx.video_passive(video, TAG).await?),
                (_, Some(display)) => Some(cx.image_passive(display, TAG).await?),
                _ => None,
            };
            let (_, preview) = cx.renditions(&renditions(&node.display_resources), TAG, true).await?;
            item.sidecars.push(CarouselMedia {
                is_video: node.is_video,
                media,
                preview,
            });
        }
        if !item.sidecars.is_empty() {
            let index = carousel_preview_index(item.sidecars.len());
            if let Some(preview) = item.sidecars[index].preview.clone() {
                item.preview = Some(preview);
            }
        }
    }

    Ok(PostRecord {
        share_url: format!("https://www.instagram.com/p/{}", media.shortcode),
        author,
        items: vec![item],
        num_results: 1,
    }
    .normalized())
}

#[derive(Debug, Deserialize)]
struct Candidate {
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ImageVersions {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct ReelCaption {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ReelItem {
    id: String,
    #[serde(default)]
    taken_at: Option<i64>,
    #[serde(default)]
    image_versions2: ImageVersions,
    #[serde(default)]
    video_versions: Option<Vec<Candidate>>,
    #[serde(default)]
    caption: Option<ReelCaption>,
}

#[derive(Debug, Deserialize)]
struct Reel {
    #[serde(default)]
    id: Option<Value>,
    user: Owner,
    #[serde(default)]
    items: Vec<ReelItem>,
}

#[derive(Debug, Deserialize)]
struct ReelsMedia {
    #[serde(default)]
    reels_media: Vec<Reel>,
}

async fn reel_record(cx: &FetchContext, reel: Reel, share_url: String) -> MeridianResult<PostRecord> {
    let author = Author {
        avatar: cx.try_image(reel.user.profile_pic_url.as_deref(), TAG, false).await,
        username: reel.user.username,
        display_name: reel.user.full_name,
        is_private: reel.user.is_private,
        is_verified: reel.user.is_verified,
    };

    let mut items = Vec::with_capacity(reel.items.len());
    for entry in reel.items {
        let candidates: Vec<Rendition> = entry
            .image_versions2
            .candidates
            .iter()
            .map(|c| Rendition::new(c.url.clone(), c.width, c.height))
            .collect();
        let video = entry.video_versions.as_ref().and_then(|v| v.first());
        let mut item = PostItem {
            id: entry.id,
            is_video: video.is_some(),
            taken_at: entry.taken_at,
            caption: entry.caption.map(|c| c.text),
            ..Default::default()
        };
        let (image, preview) = cx.renditions(&candidates, TAG, true).await?;
        match video {
            Some(video) => item.video = Some(cx.video_passive(&video.url, TAG).await?),
            None => item.image = image,
        }
        item.preview = preview;
        items.push(item);
    }

    Ok(PostRecord {
        share_url,
        author,
        items,
        num_results: 0,
    }
    .normalized())
}

/// Reels payload from the page's embedded JSON, else from the intercepted API call.
async fn reels_media(lease: &PageLease, interceptor: &mut meridian_browser::Interceptor) -> MeridianResult<ReelsMedia> {
    let html = lease.content().await?;
    if let Ok(doc) = json_script_containing(&html, "xdt_api__v1__feed__reels_media") {
        if let Some(feed) = find_all(&doc, "xdt_api__v1__feed__reels_media").first() {
            return serde_json::from_value((*feed).clone()).map_err(|e| parse_error(e.to_string()));
        }
    }
    let response = interceptor.next(INTERCEPT_WAIT).await?;
    serde_json::from_str(&response.body).map_err(|e| parse_error(e.to_string()))
}

/// `POST /api/instagram/post`: a post, reel, sidecar or highlight share link.
#[derive(Debug, Default)]
pub struct InstagramPost;

#[async_trait]
impl Fetcher for InstagramPost {
    fn route(&self) -> &'static str {
        "instagram.post"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(12 * 86_400))
            .with_negative_ttl(Some(Ttl::secs(86_400)))
            .with_timeout(Duration::from_secs(25))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        let link = find_link(&request.target, &["instagram.com", "threads.net", "threads.com"])
            .ok_or_else(|| FetchError::new(FetchErrorKind::Validation("No link in this request?".into())))?;
        Ok(canonical_instagram_url(&link))
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("instagram_post:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        if id.contains("threads.") {
            let record = threads::fetch_thread(cx, id).await?;
            return found(&record);
        }

        let mut url = id.to_string();
        if url.contains("instagram.com/s/") {
            url = canonical_instagram_url(&cx.resolve_redirect(&url).await?);
        }
        if let Some((_, highlight)) = url.split_once("/stories/highlights/") {
            let highlight_id = highlight.trim_end_matches('/').to_string();
            let mut record = highlight_record(cx, &highlight_id).await?;
            record.share_url = id.to_string();
            return found(&record);
        }

        let media = match embed_media(cx, &url).await {
            Ok(Some(media)) => media,
            Ok(None) => graphql_media(cx, &url).await?,
            Err(e) => {
                tracing::warn!(error = %e, "Embed fetch failed, trying GraphQL");
                graphql_media(cx, &url).await?
            }
        };
        let mut record = post_record(cx, media).await?;
        if record.items.is_empty() {
            return Ok(FetchOutcome::NotFound);
        }
        record.share_url = url;
        found(&record)
    }
}

/// Profile as returned by `/api/instagram/{user}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstagramProfile {
    /// Handle
    pub username: String,
    /// Display name
    pub full_name: Option<String>,
    /// Bio
    pub biography: Option<String>,
    /// Link in bio
    pub external_url: Option<String>,
    /// Cached avatar
    pub avatar: Option<MediaRef>,
    /// Private account
    pub is_private: bool,
    /// Verified badge
    pub is_verified: bool,
    /// Followers
    pub followers: u64,
    /// Following
    pub following: u64,
    /// Posts
    pub post_count: u64,
    /// Recent posts
    pub posts: Vec<ProfilePost>,
}

/// A recent post listed on a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePost {
    /// Shortcode
    pub shortcode: String,
    /// Canonical URL
    pub url: String,
    /// Caption
    pub title: Option<String>,
    /// Whether it is a video
    pub is_video: bool,
    /// Unix timestamp
    pub taken_at: Option<i64>,
    /// Thumbnail (may still be rendering)
    pub thumbnail: Option<MediaRef>,
}

#[derive(Debug, Deserialize)]
struct TimelineNode {
    shortcode: String,
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    display_url: Option<String>,
    #[serde(default)]
    taken_at_timestamp: Option<i64>,
    #[serde(default)]
    edge_media_to_caption: CaptionEdges,
}

#[derive(Debug, Deserialize)]
struct TimelineEdge {
    node: TimelineNode,
}

#[derive(Debug, Default, Deserialize)]
struct Timeline {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    edges: Vec<TimelineEdge>,
}

#[derive(Debug, Deserialize)]
struct ProfileUser {
    username: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    biography: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
    #[serde(default)]
    profile_pic_url_hd: Option<String>,
    #[serde(default)]
    profile_pic_url: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    edge_followed_by: Count,
    #[serde(default)]
    edge_follow: Count,
    #[serde(default)]
    edge_owner_to_timeline_media: Timeline,
}

/// `GET /api/instagram/{user}`.
#[derive(Debug, Default)]
pub struct InstagramProfileFetcher;

#[async_trait]
impl Fetcher for InstagramProfileFetcher {
    fn route(&self) -> &'static str {
        "instagram.profile"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(7200)).with_timeout(Duration::from_secs(20))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, INSTAGRAM_USERNAME)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("instaprofile:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lease = cx.page(false).await?;
        let mut interceptor = lease
            .intercept(&format!("api/v1/users/web_profile_info/?username={}", id))
            .await?;
        lease.navigate(&format!("https://www.instagram.com/{}", id)).await?;
        check_login_wall(cx, &lease).await?;
        if check_missing(&lease, id).await.is_err() {
            return Ok(FetchOutcome::NotFound);
        }

        let response = interceptor.next(INTERCEPT_WAIT).await?;
        let doc = response.json()?;
        let user = match doc.pointer("/data/user") {
            None | Some(Value::Null) => return Ok(FetchOutcome::NotFound),
            Some(user) => user.clone(),
        };
        let user: ProfileUser = serde_json::from_value(user).map_err(|e| parse_error(e.to_string()))?;

        let avatar_url = user.profile_pic_url_hd.as_deref().or(user.profile_pic_url.as_deref());
        let avatar = cx.try_image(avatar_url, TAG, false).await;
        let mut posts = Vec::new();
        for edge in user.edge_owner_to_timeline_media.edges {
            let node = edge.node;
            posts.push(ProfilePost {
                url: format!("https://www.instagram.com/p/{}", node.shortcode),
                title: node.edge_media_to_caption.first(),
                is_video: node.is_video,
                taken_at: node.taken_at_timestamp,
                thumbnail: cx.try_image(node.display_url.as_deref(), TAG, true).await,
                shortcode: node.shortcode,
            });
        }

        found(&InstagramProfile {
            username: user.username,
            full_name: user.full_name,
            biography: user.biography,
            external_url: user.external_url,
            avatar,
            is_private: user.is_private,
            is_verified: user.is_verified,
            followers: user.edge_followed_by.count,
            following: user.edge_follow.count,
            post_count: user.edge_owner_to_timeline_media.count,
            posts,
        })
    }
}

/// `GET /api/instagram/story/{user}`: active stories, authenticated.
#[derive(Debug, Default)]
pub struct InstagramStory;

#[async_trait]
impl Fetcher for InstagramStory {
    fn route(&self) -> &'static str {
        "instagram.story"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::between(1200, 1800))
            .with_negative_ttl(Some(Ttl::secs(3600)))
            .with_timeout(Duration::from_secs(20))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, INSTAGRAM_USERNAME)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("instastory:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lease = cx.logged_in_page().await?;
        let mut interceptor = lease.intercept("api/v1/feed/reels_media").await?;
        lease.navigate(&format!("https://www.instagram.com/stories/{}/", id)).await?;
        check_login_wall(cx, &lease).await?;

        let landed = lease.current_url().await?;
        if !landed.contains(id) || landed.trim_end_matches('/') == format!("https://www.instagram.com/{}", id) {
            tracing::debug!(landed = %landed, "No active story");
            return Ok(FetchOutcome::NotFound);
        }
        if check_missing(&lease, id).await.is_err() {
            return Ok(FetchOutcome::NotFound);
        }

        let feed = reels_media(&lease, &mut interceptor).await?;
        let Some(reel) = feed.reels_media.into_iter().next() else {
            return Ok(FetchOutcome::NotFound);
        };
        let record = reel_record(cx, reel, format!("https://www.instagram.com/stories/{}/", id)).await?;
        found(&record)
    }
}

/// A highlight reel listed on a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightEntry {
    /// Highlight id
    pub id: String,
    /// Title
    pub title: String,
    /// Cover image (may still be rendering)
    pub cover: Option<MediaRef>,
}

/// Highlight index of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightIndex {
    /// Owner
    pub username: String,
    /// Highlights, profile order
    pub highlights: Vec<HighlightEntry>,
}

#[derive(Debug, Deserialize)]
struct HighlightNode {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    cover_media_cropped_thumbnail: Option<CoverThumb>,
}

#[derive(Debug, Deserialize)]
struct CoverThumb {
    url: String,
}

#[derive(Debug, Deserialize)]
struct HighlightEdge {
    node: HighlightNode,
}

#[derive(Debug, Deserialize)]
struct HighlightEdges {
    #[serde(default)]
    edges: Vec<HighlightEdge>,
}

/// `GET /api/instagram/highlights/{user}`.
#[derive(Debug, Default)]
pub struct InstagramHighlights;

#[async_trait]
impl Fetcher for InstagramHighlights {
    fn route(&self) -> &'static str {
        "instagram.highlights"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::between(1200, 1800)).with_timeout(Duration::from_secs(12))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, INSTAGRAM_USERNAME)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("instahl:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lease = cx.logged_in_page().await?;
        let mut interceptor = lease.intercept("graphql/query").await?;
        lease.navigate(&format!("https://www.instagram.com/{}/", id)).await?;
        check_login_wall(cx, &lease).await?;
        if check_missing(&lease, id).await.is_err() {
            return Ok(FetchOutcome::NotFound);
        }

        let deadline = tokio::time::Instant::now() + INTERCEPT_WAIT;
        let edges: HighlightEdges = loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let response = interceptor.next(remaining).await?;
            let Ok(doc) = response.json() else { continue };
            if let Some(edges) = find_all(&doc, "edge_highlight_reels").first() {
                break serde_json::from_value((*edges).clone()).map_err(|e| parse_error(e.to_string()))?;
            }
        };

        let mut highlights = Vec::with_capacity(edges.edges.len());
        for edge in edges.edges {
            let node = edge.node;
            let cover_url = node.cover_media_cropped_thumbnail.as_ref().map(|c| c.url.as_str());
            highlights.push(HighlightEntry {
                cover: cx.try_image(cover_url, TAG, true).await,
                id: node.id.trim_start_matches("highlight:").to_string(),
                title: node.title,
            });
        }
        found(&HighlightIndex {
            username: id.to_string(),
            highlights,
        })
    }
}

async fn highlight_record(cx: &FetchContext, id: &str) -> MeridianResult<PostRecord> {
    let lease = cx.logged_in_page().await?;
    let mut interceptor = lease.intercept("api/v1/feed/reels_media").await?;
    let url = format!("https://www.instagram.com/stories/highlights/{}/", id);
    lease.navigate(&url).await?;
    check_login_wall(cx, &lease).await?;
    check_missing(&lease, id).await?;

    let feed = reels_media(&lease, &mut interceptor).await?;
    let wanted = format!("highlight:{}", id);
    let reel = feed
        .reels_media
        .into_iter()
        .find(|r| match &r.id {
            Some(Value::String(s)) => s == &wanted || s == id,
            _ => true,
        })
        .ok_or_else(|| not_found(id))?;
    reel_record(cx, reel, url).await
}

/// `GET /api/instagram/highlight/{id}`.
#[derive(Debug, Default)]
pub struct InstagramHighlight;

#[async_trait]
impl Fetcher for InstagramHighlight {
    fn route(&self) -> &'static str {
        "instagram.highlight"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(12 * 3600)).with_timeout(Duration::from_secs(30))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_numeric_id(request.target.trim_start_matches("highlight:"))
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("instahl:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        match highlight_record(cx, id).await {
            Ok(record) => found(&record),
            Err(e) if e.class() == meridian_error::ErrorClass::NotFound => Ok(FetchOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}
