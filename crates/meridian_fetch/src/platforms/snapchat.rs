//! Snapchat public profiles from the `/add/{user}` page.

use crate::FetchContext;
use crate::canonical::{GENERIC_USERNAME, validate_username};
use crate::embedded::next_data;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "Snapchat";

/// One story or spotlight snap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapMedia {
    /// Cached media (may still be rendering)
    pub media: MediaRef,
    /// Whether it is a video
    pub is_video: bool,
}

/// Profile as returned by `/api/snap/{user}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapProfile {
    /// Handle
    pub username: String,
    /// Display name
    pub display_name: Option<String>,
    /// Bio
    pub bio: Option<String>,
    /// Subscribers of a public profile
    pub subscriber_count: Option<u64>,
    /// Add-friend deep link
    pub one_click_url: Option<String>,
    /// Snapcode as PNG
    pub snapcode_image_url: Option<String>,
    /// Cached profile image
    pub profile_image: Option<MediaRef>,
    /// Cached bitmoji
    pub bitmoji: Option<MediaRef>,
    /// Bitmoji background URL
    pub bitmoji_background_url: Option<String>,
    /// Cached hero image
    pub hero_image: Option<MediaRef>,
    /// Current story
    pub story_media: Vec<SnapMedia>,
    /// Spotlight highlights
    pub spotlight_media: Vec<SnapMedia>,
}

fn text_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn snaps(list: Option<&Value>) -> Vec<(String, bool)> {
    list.and_then(Value::as_array)
        .map(|snaps| {
            snaps
                .iter()
                .filter_map(|snap| {
                    let url = snap.pointer("/snapUrls/mediaUrl")?.as_str()?.to_string();
                    let is_video = snap.get("snapMediaType").and_then(Value::as_u64) == Some(1);
                    Some((url, is_video))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn render_snaps(cx: &FetchContext, snaps: Vec<(String, bool)>) -> Vec<SnapMedia> {
    let mut out = Vec::with_capacity(snaps.len());
    for (url, is_video) in snaps {
        let media = if is_video {
            cx.video_passive(&url, TAG).await
        } else {
            cx.image_passive(&url, TAG).await
        };
        match media {
            Ok(media) => out.push(SnapMedia { media, is_video }),
            Err(e) => tracing::warn!(url = %url, error = %e, "Snap render failed"),
        }
    }
    out
}

/// `GET /api/snap/{user}`.
#[derive(Debug, Default)]
pub struct SnapchatUser;

#[async_trait]
impl Fetcher for SnapchatUser {
    fn route(&self) -> &'static str {
        "snapchat.profile"
    }

    fn platform(&self) -> &'static str {
        "snapchat"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(300)).with_timeout(Duration::from_secs(15))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, GENERIC_USERNAME).map(|u| u.to_lowercase())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("snapuser:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lease = cx.page(false).await?;
        lease.navigate(&format!("https://www.snapchat.com/add/{}", id)).await?;
        let mut data = lease.evaluate("__NEXT_DATA__").await.unwrap_or(Value::Null);
        if data.is_null() {
            data = match next_data(&lease.content().await?) {
                Ok(data) => data,
                Err(_) => return Ok(FetchOutcome::NotFound),
            };
        }
        let global = lease.evaluate("profile").await.unwrap_or(Value::Null);
        drop(lease);

        let Some(props) = data.pointer("/props/pageProps") else {
            return Ok(FetchOutcome::NotFound);
        };
        let Some(one_click_url) = text_at(props, "/pageLinks/oneLinkUrl") else {
            return Ok(FetchOutcome::NotFound);
        };

        let info = "/userProfile/publicProfileInfo";
        let display_name = text_at(props, &format!("{}/title", info))
            .or_else(|| text_at(props, "/userProfile/userInfo/displayName"))
            .or_else(|| text_at(&global, "/displayName"));
        let bio = text_at(props, &format!("{}/bio", info)).or_else(|| text_at(&global, "/bio"));
        let subscriber_count = text_at(props, &format!("{}/subscriberCount", info)).and_then(|c| c.parse().ok());

        let profile_image = cx
            .try_image(text_at(props, "/linkPreview/facebookImage/url").as_deref(), TAG, false)
            .await;
        let bitmoji = cx
            .try_image(
                text_at(props, "/userProfile/userInfo/bitmoji3d/avatarImage/url").as_deref(),
                TAG,
                true,
            )
            .await;
        let hero_image = cx
            .try_image(text_at(props, &format!("{}/squareHeroImageUrl", info)).as_deref(), TAG, true)
            .await;

        let story = snaps(props.pointer("/story/snapList"));
        let spotlight: Vec<(String, bool)> = props
            .get("spotlightHighlights")
            .and_then(Value::as_array)
            .map(|highlights| highlights.iter().flat_map(|h| snaps(h.get("snapList"))).collect())
            .unwrap_or_default();

        found(&SnapProfile {
            username: id.to_string(),
            display_name,
            bio,
            subscriber_count,
            snapcode_image_url: text_at(props, "/pageLinks/snapcodeImageUrl").map(|u| u.replace("type=SVG", "type=PNG")),
            one_click_url: Some(one_click_url),
            profile_image,
            bitmoji,
            bitmoji_background_url: text_at(props, "/userProfile/userInfo/bitmoji3d/backgroundImage/url"),
            hero_image,
            story_media: render_snaps(cx, story).await,
            spotlight_media: render_snaps(cx, spotlight).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snaps_kinds() {
        let list = json!([
            {"snapMediaType": 0, "snapUrls": {"mediaUrl": "https://cf-st.sc-cdn.net/a"}},
            {"snapMediaType": 1, "snapUrls": {"mediaUrl": "https://cf-st.sc-cdn.net/b"}},
            {"snapMediaType": 1}
        ]);
        let snaps = snaps(Some(&list));
        assert_eq!(snaps.len(), 2);
        assert!(!snaps[0].1);
        assert!(snaps[1].1);
    }

    #[test]
    fn test_text_at_numbers() {
        let v = json!({"a": {"n": 42, "s": "", "t": "x"}});
        assert_eq!(text_at(&v, "/a/n").as_deref(), Some("42"));
        assert_eq!(text_at(&v, "/a/s"), None);
        assert_eq!(text_at(&v, "/a/t").as_deref(), Some("x"));
    }
}
