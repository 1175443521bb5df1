//! OnlyFans public profile counters, read from the user API call the
//! profile page makes.

use crate::FetchContext;
use crate::canonical::{GENERIC_USERNAME, validate_username};
use crate::context::parse_error;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "OnlyFans";
const RESPONSE_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    about: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    header: Option<String>,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    join_date: Option<String>,
    #[serde(default)]
    posts_count: Option<u64>,
    #[serde(default)]
    photos_count: Option<u64>,
    #[serde(default)]
    videos_count: Option<u64>,
    #[serde(default)]
    favorited_count: Option<u64>,
    #[serde(default)]
    subscribers_count: Option<u64>,
}

/// Profile as returned by `/api/onlyfans/{user}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlyFansProfile {
    /// Handle
    pub username: String,
    /// Display name
    pub name: Option<String>,
    /// About text
    pub about: Option<String>,
    /// Location
    pub location: Option<String>,
    /// Website
    pub website: Option<String>,
    /// Cached avatar
    pub avatar: Option<MediaRef>,
    /// Cached header (may still be rendering)
    pub header: Option<MediaRef>,
    /// Verified
    pub is_verified: bool,
    /// Join date as the API formats it
    pub join_date: Option<String>,
    /// Posts
    pub posts_count: Option<u64>,
    /// Photos
    pub photos_count: Option<u64>,
    /// Videos
    pub videos_count: Option<u64>,
    /// Likes
    pub favorited_count: Option<u64>,
    /// Subscribers, when public
    pub subscribers_count: Option<u64>,
}

/// An API body of `{"error": {"code": 0, ...}}` means no such user.
fn is_missing(body: &Value) -> bool {
    body.pointer("/error/code").and_then(Value::as_i64) == Some(0)
}

/// `GET /api/onlyfans/{user}`.
#[derive(Debug, Default)]
pub struct OnlyFansUser;

#[async_trait]
impl Fetcher for OnlyFansUser {
    fn route(&self) -> &'static str {
        "onlyfans.profile"
    }

    fn platform(&self) -> &'static str {
        "onlyfans"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(3600)).with_timeout(Duration::from_secs(45))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, GENERIC_USERNAME).map(|u| u.to_lowercase())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("onlyfans:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lease = cx.page(true).await?;
        let mut api = lease
            .intercept(&format!("https://onlyfans.com/api2/v2/users/{}", id))
            .await?;
        lease.navigate(&format!("https://onlyfans.com/{}", id)).await?;
        let response = api.next(RESPONSE_WAIT).await?;
        drop(lease);

        let body = response.json()?;
        if is_missing(&body) {
            return Ok(FetchOutcome::NotFound);
        }
        let user: ApiUser = serde_json::from_value(body).map_err(|e| parse_error(e.to_string()))?;

        let avatar = cx.try_image(user.avatar.as_deref(), TAG, false).await;
        let header = cx.try_image(user.header.as_deref(), TAG, true).await;
        found(&OnlyFansProfile {
            username: user.username.unwrap_or_else(|| id.to_string()),
            name: user.name,
            about: user.about,
            location: user.location,
            website: user.website,
            avatar,
            header,
            is_verified: user.is_verified,
            join_date: user.join_date,
            posts_count: user.posts_count,
            photos_count: user.photos_count,
            videos_count: user.videos_count,
            favorited_count: user.favorited_count,
            subscribers_count: user.subscribers_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_user_body() {
        assert!(is_missing(&json!({"error": {"code": 0, "message": "User not found"}})));
        assert!(!is_missing(&json!({"error": {"code": 401}})));
        assert!(!is_missing(&json!({"username": "x"})));
    }

    #[test]
    fn test_api_user_camel_case() {
        let user: ApiUser = serde_json::from_value(json!({
            "username": "creator", "postsCount": 10, "isVerified": true, "joinDate": "2020-01-01T00:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(user.posts_count, Some(10));
        assert!(user.is_verified);
        assert!(user.subscribers_count.is_none());
    }
}
