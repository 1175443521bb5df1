//! Discord profile bios.
//!
//! A bio request is published on the `tessabio` channel; a bot subscribed to
//! it writes the answer to `tessabio:{xxh32(sig)}`. When no bot answers, the
//! public users endpoint is queried with the bot token.

use meridian_error::{ApiError, ApiErrorKind, HttpError, MeridianResult};
use meridian_fetch::{HttpRequest, SharedHttp};
use meridian_kv::{KeyedLocks, KvJsonExt, SharedKv};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Channel bio requests are published on.
pub const BIO_CHANNEL: &str = "tessabio";

const CACHE_TTL: Duration = Duration::from_secs(30);
const RESPONDER_WAIT: Duration = Duration::from_secs(4);
const USERS_ENDPOINT: &str = "https://discord.com/api/v10/users";
const BANNER_CDN: &str = "https://cdn.discordapp.com/banners";

/// Message published on [`BIO_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioRequest {
    /// User whose bio is wanted
    pub user_id: u64,
    /// Guild for a per-guild profile
    pub guild_id: Option<u64>,
    /// Request signature
    pub sig: String,
}

/// KV key a responder writes the answer for `sig` to.
pub fn response_key(sig: &str) -> String {
    format!("{}:{:08x}", BIO_CHANNEL, xxhash_rust::xxh32::xxh32(sig.as_bytes(), 0))
}

fn cache_key(user_id: u64, guild_id: Option<u64>) -> String {
    match guild_id {
        Some(guild) => format!("biorequest:{}{}", user_id, guild),
        None => format!("biorequest:{}", user_id),
    }
}

/// Bio lookups with a short-lived cache.
pub struct BioLookup {
    kv: SharedKv,
    http: SharedHttp,
    bot_token: Option<String>,
    locks: KeyedLocks,
    responder_wait: Duration,
}

impl std::fmt::Debug for BioLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BioLookup")
            .field("has_token", &self.bot_token.is_some())
            .field("responder_wait", &self.responder_wait)
            .finish_non_exhaustive()
    }
}

impl BioLookup {
    /// Lookup over the KV and an HTTP client.
    pub fn new(kv: SharedKv, http: SharedHttp, bot_token: Option<String>) -> Self {
        Self {
            kv,
            http,
            bot_token,
            locks: KeyedLocks::new(),
            responder_wait: RESPONDER_WAIT,
        }
    }

    /// Override how long a responder bot is waited for.
    pub fn with_responder_wait(mut self, wait: Duration) -> Self {
        self.responder_wait = wait;
        self
    }

    /// Bio of `user_id`, optionally scoped to a guild.
    ///
    /// Concurrent lookups for one key wait on each other and share the cached
    /// answer.
    #[tracing::instrument(skip(self))]
    pub async fn lookup(&self, user_id: u64, guild_id: Option<u64>) -> MeridianResult<Value> {
        let key = cache_key(user_id, guild_id);
        let _guard = self.locks.lock(&key).await;
        if let Some(cached) = self.kv.get_json::<Value>(&key).await? {
            tracing::debug!("Bio served from cache");
            return Ok(cached);
        }

        let value = match self.ask_responder(user_id, guild_id).await? {
            Some(value) => value,
            None => self.users_api(user_id).await?,
        };
        self.kv.set_json(&key, &value, Some(CACHE_TTL)).await?;
        Ok(value)
    }

    async fn ask_responder(&self, user_id: u64, guild_id: Option<u64>) -> MeridianResult<Option<Value>> {
        let request = BioRequest {
            user_id,
            guild_id,
            sig: uuid::Uuid::new_v4().simple().to_string(),
        };
        let answer_key = response_key(&request.sig);
        let payload = serde_json::to_string(&request).map_err(meridian_error::JsonError::from)?;
        self.kv.publish(BIO_CHANNEL, &payload).await?;

        let deadline = tokio::time::Instant::now() + self.responder_wait;
        while tokio::time::Instant::now() < deadline {
            let jitter = rand::thread_rng().gen_range(100..=150);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            if let Some(raw) = self.kv.get(&answer_key).await? {
                match serde_json::from_str::<Value>(&raw) {
                    Ok(value) => {
                        tracing::debug!("Bio answered by responder");
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding malformed bio answer");
                        return Ok(None);
                    }
                }
            }
        }
        tracing::debug!("No bio responder answered");
        Ok(None)
    }

    async fn users_api(&self, user_id: u64) -> MeridianResult<Value> {
        let not_found = || ApiError::new(ApiErrorKind::NotFound(format!("bio:{}", user_id)));
        let Some(token) = self.bot_token.as_deref() else {
            return Err(not_found().into());
        };

        let url = format!("{}/{}", USERS_ENDPOINT, user_id);
        let response = self
            .http
            .send(HttpRequest::get(&url).header("Authorization", format!("Bot {}", token)))
            .await?;
        if response.status == 404 {
            return Err(not_found().into());
        }
        if !response.is_success() {
            return Err(HttpError::status(response.status, format!("Users API failed for {}", user_id)).into());
        }

        let mut user: Value = response.json()?;
        if let Some(hash) = user.get("banner").and_then(Value::as_str).map(str::to_string) {
            let format = if hash.starts_with("a_") { "gif" } else { "png" };
            user["banner"] = json!({
                "hash": hash,
                "format": format,
                "url": format!("{}/{}/{}.{}?size=1024", BANNER_CDN, user_id, hash, format),
            });
        }
        Ok(json!({ "user": user }))
    }
}
