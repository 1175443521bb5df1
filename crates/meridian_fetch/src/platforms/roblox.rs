//! Roblox profiles from the public web APIs.

use crate::FetchContext;
use crate::canonical::{GENERIC_USERNAME, validate_username};
use crate::context::check_status;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::http::{Body, HttpRequest};
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::MeridianResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

const TAG: &str = "Roblox";
/// Thumbnail Roblox serves for users without an avatar.
const DEFAULT_AVATAR: &str = "https://t3.rbxcdn.com/9fc30fe577bf95e045c9a3d4abaca05d";

/// A Roblox badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    /// Badge id
    pub id: u64,
    /// Name
    pub name: String,
    /// Description
    pub description: Option<String>,
    /// Icon URL
    pub image_url: Option<String>,
}

/// Profile as returned by `/api/roblox/{user}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobloxProfile {
    /// Numeric id
    pub id: u64,
    /// Handle
    pub name: String,
    /// Display name
    pub display_name: Option<String>,
    /// About text
    pub description: Option<String>,
    /// Account creation, Unix seconds
    pub created: Option<i64>,
    /// Banned account
    pub is_banned: bool,
    /// Verified badge
    pub has_verified_badge: bool,
    /// Followers
    pub follower_count: Option<u64>,
    /// Following
    pub following_count: Option<u64>,
    /// Presence: `offline`, `online`, `In game`, `in_studio`
    pub presence: Option<String>,
    /// Where the user was last seen
    pub last_location: Option<String>,
    /// Last online, Unix seconds
    pub last_online: Option<i64>,
    /// Cached full-body avatar URL
    pub avatar_url: Option<String>,
    /// Roblox badges
    pub badges: Vec<Badge>,
    /// Earlier usernames
    pub previous_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Lookup {
    #[serde(default)]
    data: Vec<LookupEntry>,
}

#[derive(Debug, Deserialize)]
struct LookupEntry {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDetail {
    id: u64,
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    is_banned: bool,
    #[serde(default)]
    has_verified_badge: bool,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Presence {
    #[serde(default)]
    user_presence_type: u8,
    #[serde(default)]
    last_location: Option<String>,
    #[serde(default)]
    last_online: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceList {
    #[serde(default)]
    user_presences: Vec<Presence>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBadge {
    id: u64,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PastName {
    name: String,
}

fn timestamp(iso: Option<&str>) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(iso?).ok().map(|t| t.timestamp())
}

fn presence_name(kind: u8) -> &'static str {
    match kind {
        1 => "online",
        2 => "In game",
        3 => "in_studio",
        _ => "offline",
    }
}

/// Best-effort secondary lookup; failures leave the field empty.
async fn optional<T: DeserializeOwned>(cx: &FetchContext, request: HttpRequest) -> Option<T> {
    let url = request.url.clone();
    let result = async {
        let response = cx.send(request).await?;
        check_status(&url, &response)?;
        response.json::<T>()
    }
    .await;
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Optional Roblox lookup failed");
            None
        }
    }
}

/// `GET /api/roblox/{user}`.
#[derive(Debug, Default)]
pub struct RobloxUser;

#[async_trait]
impl Fetcher for RobloxUser {
    fn route(&self) -> &'static str {
        "roblox.profile"
    }

    fn platform(&self) -> &'static str {
        "roblox"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(3600)).with_timeout(Duration::from_secs(10))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, GENERIC_USERNAME)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("robloxuser2:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lookup_url = "https://users.roblox.com/v1/usernames/users";
        let response = cx
            .send(HttpRequest::post(
                lookup_url,
                Body::Json(json!({"usernames": [id], "excludeBannedUsers": false})),
            ))
            .await?;
        check_status(lookup_url, &response)?;
        let lookup: Lookup = response.json()?;
        let Some(user_id) = lookup.data.first().map(|e| e.id) else {
            return Ok(FetchOutcome::NotFound);
        };

        let user: UserDetail = cx.get_json(&format!("https://users.roblox.com/v1/users/{}", user_id)).await?;

        let (followers, following, presence, thumbnails, badges, names) = futures::join!(
            optional::<Count>(
                cx,
                HttpRequest::get(format!("https://friends.roblox.com/v1/users/{}/followers/count", user_id))
            ),
            optional::<Count>(
                cx,
                HttpRequest::get(format!("https://friends.roblox.com/v1/users/{}/followings/count", user_id))
            ),
            optional::<PresenceList>(
                cx,
                HttpRequest::post(
                    "https://presence.roblox.com/v1/presence/users",
                    Body::Json(json!({"userIds": [user_id]}))
                )
            ),
            optional::<DataList<Thumbnail>>(
                cx,
                HttpRequest::get(format!(
                    "https://thumbnails.roblox.com/v1/users/avatar?userIds={}&size=420x420&format=Png",
                    user_id
                ))
            ),
            optional::<Vec<RawBadge>>(
                cx,
                HttpRequest::get(format!(
                    "https://accountinformation.roblox.com/v1/users/{}/roblox-badges",
                    user_id
                ))
            ),
            optional::<DataList<PastName>>(
                cx,
                HttpRequest::get(format!(
                    "https://users.roblox.com/v1/users/{}/username-history?limit=100&sortOrder=Desc",
                    user_id
                ))
            ),
        );

        let avatar_source = thumbnails
            .and_then(|t| t.data.into_iter().next())
            .and_then(|t| t.image_url)
            .filter(|url| url != DEFAULT_AVATAR);
        let avatar = cx.try_image(avatar_source.as_deref(), TAG, false).await;
        let presence = presence.and_then(|p| p.user_presences.into_iter().next());

        found(&RobloxProfile {
            id: user.id,
            name: user.name,
            display_name: user.display_name,
            description: user.description,
            created: timestamp(user.created.as_deref()),
            is_banned: user.is_banned,
            has_verified_badge: user.has_verified_badge,
            follower_count: followers.map(|c| c.count),
            following_count: following.map(|c| c.count),
            presence: presence.as_ref().map(|p| presence_name(p.user_presence_type).to_string()),
            last_location: presence.as_ref().and_then(|p| p.last_location.clone()),
            last_online: presence.as_ref().and_then(|p| timestamp(p.last_online.as_deref())),
            avatar_url: avatar.map(|a| a.url),
            badges: badges
                .unwrap_or_default()
                .into_iter()
                .map(|b| Badge {
                    id: b.id,
                    name: b.name,
                    description: b.description,
                    image_url: b.image_url,
                })
                .collect(),
            previous_names: names.map(|n| n.data.into_iter().map(|p| p.name).collect()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_names() {
        assert_eq!(presence_name(0), "offline");
        assert_eq!(presence_name(2), "In game");
    }

    #[test]
    fn test_timestamp() {
        assert_eq!(timestamp(Some("2006-02-27T21:06:40.3Z")), Some(1_141_074_400));
        assert_eq!(timestamp(Some("garbage")), None);
        assert_eq!(timestamp(None), None);
    }
}
