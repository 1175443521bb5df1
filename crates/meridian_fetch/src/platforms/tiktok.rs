//! TikTok posts (mobile feed API) and profiles (embedded page state).

use crate::FetchContext;
use crate::canonical::{TIKTOK_USERNAME, find_link, strip_tracking, validate_username};
use crate::context::{check_status, not_found, parse_error};
use crate::embedded::sigi_state;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::http::HttpRequest;
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

const TAG: &str = "TikTok";
const PLATFORM: &str = "tiktok";
const FEED_API: &str = "https://api16-normal-c-useast1a.tiktokv.com/aweme/v1/feed/";
const DEFAULT_TOP_LIMIT: usize = 500;
const SCROLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_STALLS: u32 = 7;
const PREWARM: usize = 5;

static AWEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://www\.tiktok\.com/(?:embed|@(?P<user_id>[\w\.-]+)/video)/(?P<id>\d+)")
        .expect("Valid aweme regex")
});

/// Parameters the feed API expects from the Android app.
const FEED_PARAMS: &[(&str, &str)] = &[
    ("version_name", "26.1.3"),
    ("version_code", "260103"),
    ("build_number", "26.1.3"),
    ("manifest_version_code", "260103"),
    ("update_version_code", "260103"),
    ("openudid", "b58e9595a7964de6"),
    ("uuid", "8675991749151627"),
    ("_rticket", "1674158727049"),
    ("ts", "1674158727"),
    ("device_brand", "Google"),
    ("device_type", "Pixel 4"),
    ("device_platform", "android"),
    ("resolution", "1080*1920"),
    ("dpi", "420"),
    ("os_version", "10"),
    ("os_api", "29"),
    ("carrier_region", "US"),
    ("sys_region", "US"),
    ("region", "US"),
    ("app_name", "trill"),
    ("app_language", "en"),
    ("language", "en"),
    ("timezone_name", "America/New_York"),
    ("timezone_offset", "-14400"),
    ("channel", "googleplay"),
    ("ac", "wifi"),
    ("mcc_mnc", "310260"),
    ("is_my_cn", "0"),
];

/// `(user_id, aweme_id)` of a canonical video URL.
pub fn aweme_pair(url: &str) -> Option<(Option<String>, String)> {
    let caps = AWEME_RE.captures(url)?;
    Some((
        caps.name("user_id").map(|m| m.as_str().to_string()),
        caps.name("id")?.as_str().to_string(),
    ))
}

/// Feed API URL for one aweme.
pub fn feed_url(aweme_id: &str) -> String {
    let mut url = Url::parse(FEED_API).expect("Valid feed API URL");
    url.query_pairs_mut()
        .append_pair("aweme_id", aweme_id)
        .extend_pairs(FEED_PARAMS.iter().copied());
    url.to_string()
}

fn int_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) => n,
        Raw::Text(s) => s.parse().unwrap_or_default(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct UrlList {
    #[serde(default)]
    url_list: Vec<String>,
}

impl UrlList {
    fn first(&self) -> Option<&str> {
        self.url_list.first().map(String::as_str)
    }

    /// First URL that is a still image.
    fn first_still(&self) -> Option<&str> {
        self.url_list
            .iter()
            .find(|u| {
                let path = u.split('?').next().unwrap_or_default();
                [".jpeg", ".jpg", ".png"].iter().any(|ext| path.ends_with(ext))
            })
            .or_else(|| self.url_list.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct BitRate {
    #[serde(default)]
    is_h265: i64,
    #[serde(default)]
    play_addr: UrlList,
}

#[derive(Debug, Default, Deserialize)]
struct AwemeVideo {
    #[serde(default)]
    play_addr: UrlList,
    #[serde(default)]
    play_addr_h264: Option<UrlList>,
    #[serde(default)]
    bit_rate: Vec<BitRate>,
    #[serde(default)]
    origin_cover: UrlList,
    #[serde(default)]
    cover: UrlList,
}

impl AwemeVideo {
    /// The h264 stream if any, else the unwatermarked default.
    fn best_url(&self) -> Option<&str> {
        self.play_addr_h264
            .as_ref()
            .and_then(UrlList::first)
            .or_else(|| {
                self.bit_rate
                    .iter()
                    .filter(|b| b.is_h265 == 0)
                    .find_map(|b| b.play_addr.first())
            })
            .or_else(|| self.play_addr.first())
    }
}

#[derive(Debug, Default, Deserialize)]
struct AwemeAuthor {
    #[serde(default)]
    unique_id: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    avatar_thumb: UrlList,
}

#[derive(Debug, Default, Deserialize)]
struct AwemeStats {
    #[serde(default)]
    play_count: u64,
    #[serde(default)]
    digg_count: u64,
    #[serde(default)]
    comment_count: u64,
    #[serde(default)]
    share_count: u64,
}

#[derive(Debug, Deserialize)]
struct PostImage {
    #[serde(default)]
    display_image: UrlList,
}

#[derive(Debug, Default, Deserialize)]
struct ImagePostInfo {
    #[serde(default)]
    images: Vec<PostImage>,
}

#[derive(Debug, Default, Deserialize)]
struct Music {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Aweme {
    aweme_id: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    create_time: i64,
    #[serde(default)]
    author: AwemeAuthor,
    #[serde(default)]
    statistics: AwemeStats,
    #[serde(default)]
    video: AwemeVideo,
    #[serde(default)]
    image_post_info: Option<ImagePostInfo>,
    #[serde(default)]
    music: Option<Music>,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    aweme_list: Vec<Aweme>,
}

/// Author block of a TikTok post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TikTokAuthor {
    /// Handle
    pub unique_id: String,
    /// Display name
    pub nickname: String,
    /// Cached avatar
    pub avatar: Option<MediaRef>,
}

/// A TikTok post as returned by `/api/tiktok/post`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TikTokVideo {
    /// Aweme id
    pub id: String,
    /// Canonical share URL
    pub share_url: String,
    /// Description, hashtags unescaped
    pub desc: String,
    /// Author
    pub author: TikTokAuthor,
    /// Unix timestamp
    pub create_time: i64,
    /// Plays
    pub play_count: u64,
    /// Likes
    pub like_count: u64,
    /// Comments
    pub comment_count: u64,
    /// Shares
    pub share_count: u64,
    /// Cached video
    pub video: Option<MediaRef>,
    /// Cached cover
    pub cover: Option<MediaRef>,
    /// Cached slideshow images
    pub images: Vec<MediaRef>,
    /// Sound title
    pub music_title: Option<String>,
}

/// Fetch one post by URL and render its media.
#[tracing::instrument(skip(cx))]
pub async fn fetch_post(cx: &FetchContext, url: &str) -> MeridianResult<Option<TikTokVideo>> {
    let pair = match aweme_pair(url) {
        Some(pair) => pair,
        None => {
            let resolved = cx.resolve_redirect(url).await?;
            match aweme_pair(&resolved) {
                Some(pair) => pair,
                None => return Ok(None),
            }
        }
    };
    let (user_id, aweme_id) = pair;

    let response = cx
        .send(HttpRequest::get(feed_url(&aweme_id)).header("Accept", "application/json"))
        .await?;
    check_status(&aweme_id, &response)?;
    let feed: Feed = response.json()?;
    let Some(aweme) = feed.aweme_list.into_iter().find(|a| a.aweme_id == aweme_id) else {
        return Ok(None);
    };

    let unique_id = user_id.unwrap_or_else(|| aweme.author.unique_id.clone());
    let images: Vec<&str> = aweme
        .image_post_info
        .as_ref()
        .map(|info| info.images.iter().filter_map(|i| i.display_image.first_still()).collect())
        .unwrap_or_default();

    let video = match aweme.video.best_url() {
        Some(video_url) if images.is_empty() => Some(cx.video(video_url, TAG, Some(&aweme.aweme_id)).await?),
        _ => None,
    };
    let cover_url = aweme.video.origin_cover.first_still().or_else(|| aweme.video.cover.first_still());
    let cover = cx.try_image(cover_url, TAG, false).await;
    let mut rendered = Vec::with_capacity(images.len());
    for (i, image) in images.iter().enumerate() {
        rendered.push(if i == 0 {
            cx.image(image, TAG).await?
        } else {
            cx.image_passive(image, TAG).await?
        });
    }

    Ok(Some(TikTokVideo {
        share_url: format!("https://www.tiktok.com/@{}/video/{}", unique_id, aweme.aweme_id),
        desc: aweme.desc.replace("##", "#"),
        author: TikTokAuthor {
            avatar: cx.try_image(aweme.author.avatar_thumb.first(), TAG, true).await,
            unique_id,
            nickname: aweme.author.nickname,
        },
        create_time: aweme.create_time,
        play_count: aweme.statistics.play_count,
        like_count: aweme.statistics.digg_count,
        comment_count: aweme.statistics.comment_count,
        share_count: aweme.statistics.share_count,
        video,
        cover,
        images: rendered,
        music_title: aweme.music.and_then(|m| m.title),
        id: aweme.aweme_id,
    }))
}

/// `POST /api/tiktok/post`.
#[derive(Debug, Default)]
pub struct TikTokPost;

#[async_trait]
impl Fetcher for TikTokPost {
    fn route(&self) -> &'static str {
        "tiktok.post"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(60)).with_timeout(Duration::from_secs(60))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        let link = find_link(&request.target, &["tiktok.com"])
            .ok_or_else(|| FetchError::new(FetchErrorKind::Validation("invalid post url".into())))?;
        Ok(strip_tracking(&link))
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("tiktok_post:{}", id)
    }

    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        match fetch_post(cx, id).await? {
            Some(video) => found(&video),
            None => Ok(FetchOutcome::NotFound),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigiUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    unique_id: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    signature: String,
    #[serde(default)]
    avatar_larger: Option<String>,
    #[serde(default)]
    avatar_medium: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    private_account: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigiStats {
    #[serde(default)]
    follower_count: u64,
    #[serde(default)]
    following_count: u64,
    #[serde(default)]
    heart: Option<u64>,
    #[serde(default)]
    heart_count: Option<u64>,
    #[serde(default)]
    video_count: u64,
    #[serde(default)]
    digg_count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemStats {
    #[serde(default)]
    play_count: u64,
    #[serde(default)]
    comment_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigiItem {
    id: String,
    #[serde(default)]
    desc: String,
    #[serde(default, deserialize_with = "int_or_string")]
    create_time: i64,
    #[serde(default)]
    stats: ItemStats,
    #[serde(default)]
    author: Option<Value>,
}

impl SigiItem {
    fn author_id(&self) -> Option<&str> {
        match self.author.as_ref()? {
            Value::String(s) => Some(s),
            other => other.get("uniqueId")?.as_str(),
        }
    }
}

/// A TikTok profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TikTokProfile {
    /// Numeric id
    pub id: String,
    /// Handle
    pub unique_id: String,
    /// Display name
    pub nickname: String,
    /// Bio
    pub signature: String,
    /// Public URL of the cached avatar
    pub avatar_url: Option<String>,
    /// Verified badge
    pub verified: bool,
    /// Private account
    pub private_account: bool,
    /// Followers
    pub follower_count: u64,
    /// Following
    pub following_count: u64,
    /// Total likes received
    pub heart: u64,
    /// Videos posted
    pub video_count: u64,
    /// Videos liked
    pub digg_count: u64,
}

/// One video in a profile listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopVideoItem {
    /// Aweme id
    pub id: String,
    /// Description
    pub title: String,
    /// Canonical URL
    pub url: String,
    /// Plays
    pub plays: u64,
    /// Comments
    pub comments: u64,
    /// Unix timestamp
    pub date: i64,
}

/// Profile listing of `/recent` and `/top`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopVideoResults {
    /// Number of items
    pub count: usize,
    /// Profile, when it could be read
    pub author: Option<TikTokProfile>,
    /// Items
    pub items: Vec<TopVideoItem>,
}

/// Profile user and stats from either form of the embedded state.
fn sigi_user(state: &Value, username: &str) -> Option<(SigiUser, SigiStats)> {
    let (user, stats) = match state.pointer("/UserModule/users") {
        Some(users) => {
            let user = users
                .as_object()?
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(username))
                .map(|(_, v)| v)?;
            let stats = state
                .pointer("/UserModule/stats")
                .and_then(Value::as_object)
                .and_then(|s| s.iter().find(|(k, _)| k.eq_ignore_ascii_case(username)))
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            (user.clone(), stats)
        }
        None => {
            let info = state.pointer("/__DEFAULT_SCOPE__/webapp.user-detail/userInfo")?;
            (info.get("user")?.clone(), info.get("stats").cloned().unwrap_or(Value::Null))
        }
    };
    let user: SigiUser = serde_json::from_value(user).ok()?;
    let stats = serde_json::from_value(stats).unwrap_or_default();
    Some((user, stats))
}

fn sigi_items(state: &Value, username: &str) -> Vec<TopVideoItem> {
    let Some(module) = state.get("ItemModule").and_then(Value::as_object) else {
        return Vec::new();
    };
    module
        .values()
        .filter_map(|v| serde_json::from_value::<SigiItem>(v.clone()).ok())
        .map(|item| TopVideoItem {
            url: format!(
                "https://www.tiktok.com/@{}/video/{}",
                item.author_id().unwrap_or(username),
                item.id
            ),
            title: item.desc,
            plays: item.stats.play_count,
            comments: item.stats.comment_count,
            date: item.create_time,
            id: item.id,
        })
        .collect()
}

/// Load the profile page and read its embedded state.
async fn profile_state(cx: &FetchContext, username: &str) -> MeridianResult<Value> {
    let lease = cx.page(true).await?;
    lease.navigate(&format!("https://www.tiktok.com/@{}", username)).await?;
    let html = lease.content().await?;
    sigi_state(&html).map_err(|_| not_found(username))
}

async fn build_profile(cx: &FetchContext, state: &Value, username: &str) -> Option<TikTokProfile> {
    let (user, stats) = sigi_user(state, username)?;
    let avatar_url = user.avatar_larger.as_deref().or(user.avatar_medium.as_deref());
    let avatar = cx.try_image(avatar_url, TAG, false).await;
    Some(TikTokProfile {
        id: user.id,
        unique_id: username.to_string(),
        nickname: user.nickname,
        signature: user.signature,
        avatar_url: avatar.map(|a| a.url),
        verified: user.verified,
        private_account: user.private_account,
        follower_count: stats.follower_count,
        following_count: stats.following_count,
        heart: stats.heart.or(stats.heart_count).unwrap_or_default(),
        video_count: stats.video_count,
        digg_count: stats.digg_count,
    })
}

fn username(request: &FetchRequest) -> MeridianResult<String> {
    validate_username(&request.target, TIKTOK_USERNAME).map(|u| u.to_lowercase())
}

/// `GET /api/tiktok/{user}`.
#[derive(Debug, Default)]
pub struct TikTokProfileFetcher;

#[async_trait]
impl Fetcher for TikTokProfileFetcher {
    fn route(&self) -> &'static str {
        "tiktok.profile"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(4 * 3600)).with_timeout(Duration::from_secs(40))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        username(request)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("tiktok:profile:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let state = profile_state(cx, id).await?;
        match build_profile(cx, &state, id).await {
            Some(profile) => found(&profile),
            None => {
                tracing::warn!(username = id, "User missing from embedded state");
                Ok(FetchOutcome::NotFound)
            }
        }
    }
}

/// `GET /api/tiktok/{user}/recent`: the items embedded in the profile page.
#[derive(Debug, Default)]
pub struct TikTokRecent;

#[async_trait]
impl Fetcher for TikTokRecent {
    fn route(&self) -> &'static str {
        "tiktok.recent"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(4 * 3600)).with_timeout(Duration::from_secs(120))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        username(request)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("tiktok:recent:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let state = profile_state(cx, id).await?;
        let mut items = sigi_items(&state, id);
        if items.is_empty() {
            return Ok(FetchOutcome::NotFound);
        }
        items.sort_by(|a, b| b.date.cmp(&a.date));

        for item in items.iter().take(PREWARM) {
            let cx = cx.clone();
            let url = item.url.clone();
            tokio::spawn(async move {
                if let Err(e) = fetch_post(&cx, &url).await {
                    tracing::debug!(url = %url, error = %e, "Pre-warm failed");
                }
            });
        }

        found(&TopVideoResults {
            count: items.len(),
            author: build_profile(cx, &state, id).await,
            items,
        })
    }
}

/// `GET /api/tiktok/{user}/top`: scroll the whole feed, collecting every
/// `item_list` page.
#[derive(Debug, Default)]
pub struct TikTokTop;

fn item_list_entries(doc: &Value) -> Vec<TopVideoItem> {
    let Some(list) = doc.get("itemList").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|v| serde_json::from_value::<SigiItem>(v.clone()).ok())
        .filter_map(|item| {
            let author = item.author_id()?.to_string();
            Some(TopVideoItem {
                url: format!("https://www.tiktok.com/@{}/video/{}", author, item.id),
                title: item.desc,
                plays: item.stats.play_count,
                comments: item.stats.comment_count,
                date: item.create_time,
                id: item.id,
            })
        })
        .collect()
}

/// Keep the first occurrence of every URL.
fn dedupe(items: Vec<TopVideoItem>) -> Vec<TopVideoItem> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.url.clone())).collect()
}

#[async_trait]
impl Fetcher for TikTokTop {
    fn route(&self) -> &'static str {
        "tiktok.top"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(900))
            .with_negative_ttl(None)
            .with_timeout(Duration::from_secs(300))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        username(request)
    }

    fn cache_key(&self, id: &str, request: &FetchRequest) -> String {
        format!("top_tiktok:{}{}", id, request.limit.unwrap_or(DEFAULT_TOP_LIMIT))
    }

    #[tracing::instrument(skip(self, cx, request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let limit = request.limit.unwrap_or(DEFAULT_TOP_LIMIT);
        let lease = cx.page(true).await?;
        let mut interceptor = lease.intercept("item_list").await?;
        lease.navigate(&format!("https://www.tiktok.com/@{}", id)).await?;

        let html = lease.content().await?;
        let state = sigi_state(&html).unwrap_or(Value::Null);
        let mut items = sigi_items(&state, id);

        let mut stalls = 0;
        loop {
            tokio::time::sleep(SCROLL_INTERVAL).await;
            while let Some(response) = interceptor.try_next() {
                match response.json() {
                    Ok(doc) => {
                        let page = item_list_entries(&doc);
                        tracing::debug!(items = page.len(), "Captured item_list page");
                        items.extend(page);
                    }
                    Err(e) => tracing::debug!(error = %e, "Skipping undecodable item_list"),
                }
            }

            let before = lease.evaluate("document.body.scrollHeight").await?;
            lease.evaluate("window.scrollTo(0, document.body.scrollHeight);").await?;
            let after = lease.evaluate("document.body.scrollHeight").await?;
            if before == after {
                stalls += 1;
                if stalls > MAX_STALLS {
                    tracing::info!(items = items.len(), "Feed exhausted");
                    break;
                }
            }
            if items.len() > limit {
                tracing::info!(items = items.len(), limit, "Reached item limit");
                break;
            }
        }
        drop(interceptor);
        drop(lease);

        let items = dedupe(items);
        if items.is_empty() {
            return Ok(FetchOutcome::NotFound);
        }
        found(&TopVideoResults {
            count: items.len(),
            author: build_profile(cx, &state, id).await,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aweme_pair() {
        let (user, id) = aweme_pair("https://www.tiktok.com/@mrbeast/video/7239012345678901234").unwrap();
        assert_eq!(user.as_deref(), Some("mrbeast"));
        assert_eq!(id, "7239012345678901234");

        let (user, id) = aweme_pair("https://www.tiktok.com/embed/7239012345678901234").unwrap();
        assert!(user.is_none());
        assert_eq!(id, "7239012345678901234");

        assert!(aweme_pair("https://vm.tiktok.com/ZMabc123/").is_none());
    }

    #[test]
    fn test_feed_url_carries_app_bundle() {
        let url = feed_url("42");
        assert!(url.starts_with(FEED_API));
        assert!(url.contains("aweme_id=42"));
        assert!(url.contains("device_type=Pixel+4"));
        assert!(url.contains("app_name=trill"));
    }

    #[test]
    fn test_best_url_prefers_h264() {
        let video: AwemeVideo = serde_json::from_value(serde_json::json!({
            "play_addr": {"url_list": ["https://v/default"]},
            "bit_rate": [
                {"is_h265": 1, "play_addr": {"url_list": ["https://v/h265"]}},
                {"is_h265": 0, "play_addr": {"url_list": ["https://v/h264"]}}
            ]
        }))
        .unwrap();
        assert_eq!(video.best_url(), Some("https://v/h264"));

        let video: AwemeVideo = serde_json::from_value(serde_json::json!({
            "play_addr": {"url_list": ["https://v/default"]},
            "play_addr_h264": {"url_list": ["https://v/explicit"]}
        }))
        .unwrap();
        assert_eq!(video.best_url(), Some("https://v/explicit"));
    }

    #[test]
    fn test_sigi_user_from_rehydration_state() {
        let state = serde_json::json!({
            "__DEFAULT_SCOPE__": {"webapp.user-detail": {"userInfo": {
                "user": {"id": "1", "uniqueId": "mrbeast", "nickname": "MrBeast", "avatarLarger": "https://p16/a.jpeg"},
                "stats": {"followerCount": 10, "heartCount": 99}
            }}}
        });
        let (user, stats) = sigi_user(&state, "mrbeast").unwrap();
        assert_eq!(user.unique_id, "mrbeast");
        assert_eq!(stats.follower_count, 10);
        assert_eq!(stats.heart_count, Some(99));
    }

    #[test]
    fn test_item_times_accept_strings() {
        let state = serde_json::json!({"ItemModule": {
            "1": {"id": "1", "desc": "a", "createTime": "1674158727", "author": "mrbeast"},
            "2": {"id": "2", "desc": "b", "createTime": 1674158800}
        }});
        let mut items = sigi_items(&state, "mrbeast");
        items.sort_by_key(|i| i.date);
        assert_eq!(items[0].date, 1674158727);
        assert_eq!(items[1].url, "https://www.tiktok.com/@mrbeast/video/2");
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let item = |id: &str, plays| TopVideoItem {
            id: id.into(),
            title: String::new(),
            url: format!("https://www.tiktok.com/@a/video/{}", id),
            plays,
            comments: 0,
            date: 0,
        };
        let items = dedupe(vec![item("1", 5), item("2", 1), item("1", 9)]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].plays, 5);
    }
}
