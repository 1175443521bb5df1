//! Threads posts, read from the JSON the post page embeds.

use crate::FetchContext;
use crate::canonical::{find_link, strip_tracking};
use crate::context::{not_found, parse_error};
use crate::embedded::{find_all, json_script_containing};
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::records::{Author, CarouselMedia, PostItem, PostRecord, carousel_preview_index};
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use meridian_render::Rendition;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "Threads";

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

impl ImageVersions {
    fn renditions(&self) -> Vec<Rendition> {
        self.candidates
            .iter()
            .map(|c| Rendition::new(c.url.clone(), c.width, c.height))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ThreadUser {
    username: String,
    #[serde(default)]
    profile_pic_url: Option<String>,
    #[serde(default)]
    is_verified: bool,
}

#[derive(Debug, Deserialize)]
struct Caption {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CarouselChild {
    #[serde(default)]
    image_versions2: ImageVersions,
    #[serde(default)]
    video_versions: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct ThreadPost {
    #[serde(default)]
    pk: Option<String>,
    code: String,
    user: ThreadUser,
    #[serde(default)]
    caption: Option<Caption>,
    #[serde(default)]
    image_versions2: ImageVersions,
    #[serde(default)]
    video_versions: Option<Vec<Candidate>>,
    #[serde(default)]
    carousel_media: Option<Vec<CarouselChild>>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    taken_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ThreadItem {
    post: ThreadPost,
}

/// Fetch a Threads post and render its media.
#[tracing::instrument(skip(cx))]
pub async fn fetch_thread(cx: &FetchContext, url: &str) -> MeridianResult<PostRecord> {
    let html = cx.get_text(url).await?;
    let doc = json_script_containing(&html, "thread_items").map_err(|_| not_found(url))?;
    let items = find_all(&doc, "thread_items");
    let first = items
        .first()
        .and_then(|items| items.as_array())
        .and_then(|items| items.first())
        .ok_or_else(|| not_found(url))?;
    let ThreadItem { post } = serde_json::from_value(first.clone()).map_err(|e| parse_error(e.to_string()))?;

    let author = Author {
        avatar: cx.try_image(post.user.profile_pic_url.as_deref(), TAG, true).await,
        username: post.user.username,
        is_verified: post.user.is_verified,
        ..Default::default()
    };

    let video = post.video_versions.as_ref().and_then(|v| v.first());
    let mut item = PostItem {
        id: post.pk.clone().unwrap_or_else(|| post.code.clone()),
        is_video: video.is_some(),
        caption: post.caption.map(|c| c.text),
        like_count: post.like_count,
        taken_at: post.taken_at,
        ..Default::default()
    };
    let (image, preview) = cx.renditions(&post.image_versions2.renditions(), TAG, false).await?;
    match video {
        Some(video) => item.video = Some(cx.video(&video.url, TAG, None).await?),
        None => item.image = image,
    }
    item.preview = preview;

    for child in post.carousel_media.unwrap_or_default() {
        let video = child.video_versions.as_ref().and_then(|v| v.first());
        let (image, preview) = cx.renditions(&child.image_versions2.renditions(), TAG, true).await?;
        let media = match video {
            Some(video) => Some(cx.video_passive(&video.url, TAG).await?),
            None => image,
        };
        item.sidecars.push(CarouselMedia {
            is_video: video.is_some(),
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

    Ok(PostRecord {
        share_url: format!("https://www.threads.net/t/{}", post.code),
        author,
        items: vec![item],
        num_results: 1,
    }
    .normalized())
}

/// `POST /api/threads/post`.
#[derive(Debug, Default)]
pub struct ThreadsPost;

#[async_trait]
impl Fetcher for ThreadsPost {
    fn route(&self) -> &'static str {
        "threads.post"
    }

    fn platform(&self) -> &'static str {
        "threads"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(12 * 86_400))
            .with_negative_ttl(Some(Ttl::secs(3600)))
            .with_timeout(Duration::from_secs(25))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        let link = find_link(&request.target, &["threads.net", "threads.com"])
            .ok_or_else(|| FetchError::new(FetchErrorKind::Validation("No threads link in this request?".into())))?;
        Ok(strip_tracking(&link).trim_end_matches('/').to_string())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("threads_post:{}", id)
    }

    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        match fetch_thread(cx, id).await {
            Ok(record) => found(&record),
            Err(e) if e.class() == meridian_error::ErrorClass::NotFound => Ok(FetchOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}
