//! Pinterest pins, profiles and reverse image search.

use crate::FetchContext;
use crate::context::{check_status, parse_error};
use crate::embedded::meta_content;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::http::{Body, FormPart, HttpRequest};
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use meridian_render::reencode_jpeg;
use meridian_storage::{MediaType, prekey_for};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

const TAG: &str = "Pinterest";
const PLATFORM: &str = "pinterest";
const PIN_RESOURCE: &str = "https://www.pinterest.com/resource/PinResource/get/";
const LENS_SEARCH: &str = "https://api.pinterest.com/v3/visual_search/lens/search/";
const LENS_BEARER: &str = "MTQzMTU5NDo5MzEzMzA1MzUzNDk5NTE5NDk6OTIyMzM3MjAzNjg1NDc3NTgwNzoxfDE2OTU5NTc5Mzc6MC0tN2M4M2IzNGI3MzdjNDg0YmM2ZjZhZjM3ZTFmODlmMWM=";
const MAX_VIDEO_RENDITIONS: usize = 3;

/// Keys dropped from the pin document before it is returned.
const DISCARD_KEYS: &[&str] = &[
    "enabled_advertiser_countries",
    "user_agent",
    "unauth_id",
    "client_context",
    "csp_nonce",
    "tracking_params",
];

static POST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:[^/]+\.)?pinterest\.[a-z.]+/pin/(?P<id>\d+)").expect("Valid pin regex")
});

/// Pin URL for `url_or_id`: short bare ids become a pin URL.
pub fn pin_url(url_or_id: &str) -> String {
    let input = url_or_id.trim();
    if !input.starts_with("https://www.pinterest.com") && input.len() < 32 {
        format!("https://www.pinterest.com/pin/{}/", input)
    } else {
        input.to_string()
    }
}

/// Numeric pin id of a pin URL.
pub fn pin_id(url: &str) -> Option<String> {
    POST_RE.captures(url).map(|c| c["id"].to_string())
}

/// Media kind of a URL string, judged by its path extension.
fn media_kind(value: &str) -> Option<MediaType> {
    if !value.starts_with("http") {
        return None;
    }
    MediaType::from_filename(prekey_for(value))
}

/// Drop discarded keys and clip `video_list` maps to their first `.mp4` entries.
fn prune(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|k, _| !DISCARD_KEYS.contains(&k.as_str()));
            for (key, child) in map.iter_mut() {
                if key == "video_list" {
                    if let Value::Object(list) = child {
                        let clipped: Map<String, Value> = list
                            .iter()
                            .filter(|(_, v)| v.get("url").and_then(Value::as_str).is_some_and(|u| u.contains(".mp4")))
                            .take(MAX_VIDEO_RENDITIONS)
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        if !clipped.is_empty() {
                            *list = clipped;
                        }
                    }
                }
                prune(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(prune),
        _ => {}
    }
}

fn collect_media(value: &Value, out: &mut Vec<(String, MediaType)>) {
    match value {
        Value::String(s) => {
            if let Some(kind) = media_kind(s) {
                if !out.iter().any(|(u, _)| u == s) {
                    out.push((s.clone(), kind));
                }
            }
        }
        Value::Object(map) => map.values().for_each(|v| collect_media(v, out)),
        Value::Array(items) => items.iter().for_each(|v| collect_media(v, out)),
        _ => {}
    }
}

fn rewrite(value: &mut Value, rendered: &HashMap<String, MediaRef>) {
    match value {
        Value::String(s) => {
            if let Some(media) = rendered.get(s.as_str()) {
                *s = media.url.clone();
            }
        }
        Value::Object(map) => map.values_mut().for_each(|v| rewrite(v, rendered)),
        Value::Array(items) => items.iter_mut().for_each(|v| rewrite(v, rendered)),
        _ => {}
    }
}

/// One media item of a pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMedia {
    /// Cache URL
    pub url: String,
    /// Cache filename
    pub filename: String,
    /// Whether it is a video
    pub is_video: bool,
}

/// A pin as returned by `/api/pinterest/post`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinterestPost {
    /// Pin id
    pub id: String,
    /// Canonical pin URL
    pub share_url: String,
    /// Title
    pub title: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Pinner's handle
    pub pinner: Option<String>,
    /// Principal image first, then video renditions
    pub items: Vec<PinMedia>,
    /// The pin document with media URLs rewritten to the cache
    pub data: Value,
}

fn text(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `GET /api/pinterest/post?url_or_id=`.
#[derive(Debug, Default)]
pub struct PinterestPostFetcher;

#[async_trait]
impl Fetcher for PinterestPostFetcher {
    fn route(&self) -> &'static str {
        "pinterest.post"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(3600)).with_timeout(Duration::from_secs(25))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        let url = pin_url(&request.target);
        if pin_id(&url).is_none() {
            return Err(FetchError::new(FetchErrorKind::Validation(format!("{} is not a pin", url))).into());
        }
        Ok(url)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("pinpost:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let pin = pin_id(id).ok_or_else(|| parse_error(id))?;
        let options = json!({"options": {"field_set_key": "unauth_react_main_pin", "id": pin}});
        let mut url = reqwest::Url::parse(PIN_RESOURCE).map_err(|e| parse_error(e.to_string()))?;
        url.query_pairs_mut().append_pair("data", &options.to_string());

        let response = cx
            .send(HttpRequest::get(url.to_string()).header("Accept", "application/json,text/html;q=0.9"))
            .await?;
        if response.status == 404 {
            return Ok(FetchOutcome::NotFound);
        }
        check_status(id, &response)?;
        let doc: Value = response.json()?;
        let mut data = match doc.pointer("/resource_response/data") {
            None | Some(Value::Null) => return Ok(FetchOutcome::NotFound),
            Some(data) => data.clone(),
        };
        prune(&mut data);

        let mut media = Vec::new();
        collect_media(&data, &mut media);
        let mut rendered = HashMap::with_capacity(media.len());
        for (source, kind) in &media {
            let result = match kind {
                MediaType::Video => cx.video_passive(source, TAG).await,
                _ => cx.image(source, TAG).await,
            };
            match result {
                Ok(media) => {
                    rendered.insert(source.clone(), media);
                }
                Err(e) => tracing::warn!(url = %source, error = %e, "Pin media render failed"),
            }
        }

        let mut items = Vec::new();
        let principal = data
            .pointer("/images/orig/url")
            .and_then(Value::as_str)
            .and_then(|u| rendered.get(u));
        if let Some(image) = principal {
            items.push(PinMedia {
                url: image.url.clone(),
                filename: image.filename.clone(),
                is_video: false,
            });
        }
        for (source, kind) in &media {
            if *kind == MediaType::Video {
                if let Some(video) = rendered.get(source) {
                    items.push(PinMedia {
                        url: video.url.clone(),
                        filename: video.filename.clone(),
                        is_video: true,
                    });
                }
            }
        }

        rewrite(&mut data, &rendered);
        found(&PinterestPost {
            share_url: format!("https://www.pinterest.com/pin/{}/", pin),
            title: text(&data, "title").or_else(|| text(&data, "grid_title")),
            description: text(&data, "description"),
            pinner: data.pointer("/pinner/username").and_then(Value::as_str).map(str::to_string),
            id: pin,
            items,
            data,
        })
    }
}

/// A Pinterest profile read from the page's meta tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinterestProfile {
    /// Handle
    pub username: String,
    /// Profile URL
    pub url: Option<String>,
    /// About text
    pub description: Option<String>,
    /// Followers
    pub followers: Option<u64>,
    /// Following
    pub following: Option<u64>,
    /// Pins
    pub pins: Option<u64>,
    /// Cached avatar URL
    pub avatar_url: Option<String>,
}

fn meta_count(html: &str, key: &str) -> Option<u64> {
    meta_content(html, key).and_then(|v| v.replace(',', "").parse().ok())
}

/// `GET /api/pinterest/{user}`.
#[derive(Debug, Default)]
pub struct PinterestUser;

#[async_trait]
impl Fetcher for PinterestUser {
    fn route(&self) -> &'static str {
        "pinterest.user"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(120)).with_timeout(Duration::from_secs(25))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        crate::canonical::validate_username(&request.target, crate::canonical::GENERIC_USERNAME)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("pinuser:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let html = match cx.get_text(&format!("https://www.pinterest.com/{}/", id)).await {
            Ok(html) => html,
            Err(e) if e.class() == meridian_error::ErrorClass::NotFound => return Ok(FetchOutcome::NotFound),
            Err(e) => return Err(e),
        };
        let Some(url) = meta_content(&html, "og:url") else {
            return Ok(FetchOutcome::NotFound);
        };
        let avatar = cx
            .try_image(meta_content(&html, "og:image").as_deref(), "pin", false)
            .await;
        found(&PinterestProfile {
            username: id.to_string(),
            url: Some(url),
            description: meta_content(&html, "pinterestapp:about"),
            followers: meta_count(&html, "pinterestapp:followers"),
            following: meta_count(&html, "pinterestapp:following"),
            pins: meta_count(&html, "pinterestapp:pins"),
            avatar_url: avatar.map(|a| a.url),
        })
    }
}

/// One visual-search match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseMatch {
    /// Pin id
    pub id: String,
    /// Pin URL
    pub url: String,
    /// Title or description
    pub title: Option<String>,
    /// Cached thumbnail (may still be rendering)
    pub image: Option<MediaRef>,
}

/// Result of a reverse image search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseResult {
    /// Number of matches
    pub count: usize,
    /// Matches, best first
    pub results: Vec<ReverseMatch>,
}

fn lens_form(jpeg: Vec<u8>) -> Vec<FormPart> {
    let mut parts: Vec<FormPart> = [
        ("x", "0"),
        ("y", "0"),
        ("h", "1"),
        ("w", "1"),
        ("camera_type", "0"),
        ("search_type", "0"),
        ("source_type", "0"),
        ("crop_source", "5"),
        ("page_size", "50"),
    ]
    .into_iter()
    .map(|(k, v)| FormPart::Text(k.to_string(), v.to_string()))
    .collect();
    parts.push(FormPart::File(
        "image".into(),
        "image.jpg".into(),
        "image/jpeg".into(),
        jpeg,
    ));
    parts
}

/// `POST /api/pinterest/reverse`: visual search with the mobile lens endpoint.
#[derive(Debug, Default)]
pub struct PinterestReverse;

#[async_trait]
impl Fetcher for PinterestReverse {
    fn route(&self) -> &'static str {
        "pinterest.reverse"
    }

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(3600)).with_timeout(Duration::from_secs(30))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        let url = request.target.trim();
        if reqwest::Url::parse(url).map_or(true, |u| !matches!(u.scheme(), "http" | "https")) {
            return Err(FetchError::new(FetchErrorKind::Validation(format!("{} is not an image URL", url))).into());
        }
        Ok(url.to_string())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("pinreverse:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let download = cx.send(HttpRequest::get(id)).await?;
        check_status(id, &download)?;
        let jpeg = reencode_jpeg(download.body).await?;

        let request = HttpRequest::post(LENS_SEARCH, Body::Multipart(lens_form(jpeg)))
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", LENS_BEARER))
            .header("X-Pinterest-Device", "iPhone12,5")
            .header("X-Pinterest-AppState", "active")
            .header("X-Pinterest-App-Type-Detailed", "1")
            .header("Accept-Language", "en-US")
            .header("User-Agent", "Pinterest for iOS/11.34.1 (iPhone12,5; 16.6.1)");
        let response = cx.send(request).await?;
        check_status(LENS_SEARCH, &response)?;
        let doc: Value = response.json()?;

        let entries = doc.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(pin) = entry.get("id").and_then(Value::as_str) else { continue };
            let thumb = entry
                .pointer("/images/736x/url")
                .or_else(|| entry.get("image_medium_url"))
                .and_then(Value::as_str);
            results.push(ReverseMatch {
                id: pin.to_string(),
                url: format!("https://www.pinterest.com/pin/{}/", pin),
                title: text(&entry, "grid_title").or_else(|| text(&entry, "description")),
                image: cx.try_image(thumb, TAG, true).await,
            });
        }
        if results.is_empty() {
            return Ok(FetchOutcome::NotFound);
        }
        found(&ReverseResult {
            count: results.len(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_url_from_id() {
        assert_eq!(pin_url("1234567890"), "https://www.pinterest.com/pin/1234567890/");
        assert_eq!(
            pin_url("https://www.pinterest.com/pin/42/"),
            "https://www.pinterest.com/pin/42/"
        );
        assert_eq!(pin_id("https://pinterest.co.uk/pin/42/").as_deref(), Some("42"));
        assert!(pin_id("https://www.pinterest.com/nasa/").is_none());
    }

    #[test]
    fn test_prune_clips_video_list() {
        let mut data = json!({
            "csp_nonce": "x",
            "videos": {"video_list": {
                "V_HLSV3": {"url": "https://v/a.m3u8"},
                "V_720": {"url": "https://v/720.mp4"},
                "V_480": {"url": "https://v/480.mp4"},
                "V_360": {"url": "https://v/360.mp4"},
                "V_240": {"url": "https://v/240.mp4"}
            }}
        });
        prune(&mut data);
        assert!(data.get("csp_nonce").is_none());
        let list = data.pointer("/videos/video_list").unwrap().as_object().unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.values().all(|v| v["url"].as_str().unwrap().ends_with(".mp4")));
    }

    #[test]
    fn test_collect_media_dedupes() {
        let data = json!({
            "images": {"orig": {"url": "https://i.pinimg.com/originals/a.jpg"}},
            "pinner": {"image_small_url": "https://i.pinimg.com/originals/a.jpg"},
            "link": "https://example.com/page",
            "videos": {"video_list": {"V": {"url": "https://v.pinimg.com/b.mp4"}}}
        });
        let mut media = Vec::new();
        collect_media(&data, &mut media);
        assert_eq!(media.len(), 2);
        assert!(media.contains(&("https://v.pinimg.com/b.mp4".to_string(), MediaType::Video)));
    }
}
