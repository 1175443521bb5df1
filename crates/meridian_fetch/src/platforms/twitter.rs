//! Twitter/X profiles with their latest tweets, read from the GraphQL
//! responses the profile page makes.

use crate::FetchContext;
use crate::canonical::{GENERIC_USERNAME, validate_username};
use crate::context::parse_error;
use crate::embedded::find_all;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "Twitter";
const MISSING_ACCOUNT: &str = "This account doesn’t exist";
const PROTECTED: &str = "are protected";
const RESPONSE_WAIT: Duration = Duration::from_secs(10);

/// Tweets of a profile, or `false` when they cannot be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tweets {
    /// Latest tweets
    List(Vec<Tweet>),
    /// Protected or suspended: always `false`
    Hidden(bool),
}

/// A tweet from the profile timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    /// Tweet id
    pub id: String,
    /// Full text
    pub text: String,
    /// Creation time as Twitter formats it
    pub created_at: Option<String>,
    /// Likes
    pub likes: u64,
    /// Retweets
    pub retweets: u64,
}

/// Profile as returned by `/api/twitter/{user}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterProfile {
    /// Handle
    pub username: String,
    /// Numeric id
    pub id: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Bio
    pub description: Option<String>,
    /// Cached avatar (400x400)
    pub avatar: Option<MediaRef>,
    /// Cached banner (may still be rendering)
    pub banner: Option<MediaRef>,
    /// Followers
    pub followers: u64,
    /// Following
    pub following: u64,
    /// Tweets posted
    pub tweet_count: u64,
    /// Blue check
    pub verified: bool,
    /// Protected account
    pub protected: bool,
    /// Suspended or otherwise unavailable
    pub suspended: bool,
    /// Account creation time
    pub created_at: Option<String>,
    /// Latest tweets
    pub tweets: Tweets,
}

#[derive(Debug, Default, Deserialize)]
struct Legacy {
    #[serde(default)]
    screen_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    followers_count: u64,
    #[serde(default)]
    friends_count: u64,
    #[serde(default)]
    statuses_count: u64,
    #[serde(default)]
    profile_image_url_https: Option<String>,
    #[serde(default)]
    profile_banner_url: Option<String>,
    #[serde(default)]
    protected: bool,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResult {
    #[serde(default, rename = "__typename")]
    typename: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    rest_id: Option<String>,
    #[serde(default)]
    is_blue_verified: bool,
    #[serde(default)]
    legacy: Legacy,
}

impl UserResult {
    fn is_unavailable(&self) -> bool {
        self.reason.is_some() || self.typename.as_deref() == Some("UserUnavailable")
    }
}

#[derive(Debug, Deserialize)]
struct TweetLegacy {
    #[serde(default)]
    id_str: String,
    #[serde(default)]
    full_text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    favorite_count: u64,
    #[serde(default)]
    retweet_count: u64,
}

/// Full-size avatar URL of a `_normal` thumbnail.
pub fn full_size_avatar(url: &str) -> String {
    url.replace("_normal.", "_400x400.")
}

fn timeline_tweets(doc: &Value) -> Vec<Tweet> {
    find_all(doc, "tweet_results")
        .into_iter()
        .filter_map(|r| r.pointer("/result/legacy").or_else(|| r.pointer("/result/tweet/legacy")))
        .filter_map(|legacy| serde_json::from_value::<TweetLegacy>(legacy.clone()).ok())
        .filter(|t| !t.id_str.is_empty())
        .map(|t| Tweet {
            id: t.id_str,
            text: t.full_text,
            created_at: t.created_at,
            likes: t.favorite_count,
            retweets: t.retweet_count,
        })
        .collect()
}

/// `GET /api/twitter/{user}`.
#[derive(Debug, Default)]
pub struct TwitterUser;

#[async_trait]
impl Fetcher for TwitterUser {
    fn route(&self) -> &'static str {
        "twitter.profile"
    }

    fn platform(&self) -> &'static str {
        "twitter"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::between(500, 820)).with_timeout(Duration::from_secs(25))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, GENERIC_USERNAME)
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("twitter_profile:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let lease = cx.page(false).await?;
        let mut user_responses = lease.intercept("UserByScreenName").await?;
        let mut tweet_responses = lease.intercept("UserTweets").await?;
        lease.navigate(&format!("https://x.com/{}", id)).await?;

        let html = lease.content().await?;
        if html.contains(MISSING_ACCOUNT) {
            return Ok(FetchOutcome::NotFound);
        }
        let protected_page = html.contains(PROTECTED);

        let doc = user_responses.next(RESPONSE_WAIT).await?.json()?;
        let result = match doc.pointer("/data/user/result") {
            Some(result) if result.is_object() => result.clone(),
            _ => return Ok(FetchOutcome::NotFound),
        };
        let user: UserResult = serde_json::from_value(result).map_err(|e| parse_error(e.to_string()))?;
        let suspended = user.is_unavailable();
        let protected = protected_page || user.legacy.protected;

        let tweets = if suspended || protected {
            Tweets::Hidden(false)
        } else {
            let doc = tweet_responses.next(RESPONSE_WAIT).await?.json()?;
            Tweets::List(timeline_tweets(&doc))
        };
        drop(lease);

        let avatar_url = user.legacy.profile_image_url_https.as_deref().map(full_size_avatar);
        let avatar = cx.try_image(avatar_url.as_deref(), TAG, false).await;
        let banner = cx
            .try_image(user.legacy.profile_banner_url.as_deref(), TAG, true)
            .await;

        tracing::debug!(suspended, protected, "Twitter profile read");
        found(&TwitterProfile {
            username: user.legacy.screen_name.unwrap_or_else(|| id.to_string()),
            id: user.rest_id,
            name: user.legacy.name,
            description: user.legacy.description,
            avatar,
            banner,
            followers: user.legacy.followers_count,
            following: user.legacy.friends_count,
            tweet_count: user.legacy.statuses_count,
            verified: user.legacy.verified || user.is_blue_verified,
            protected,
            suspended,
            created_at: user.legacy.created_at,
            tweets,
        })
    }
}
