//! Spotify account linking.
//!
//! A bot stores `sp_exchange_{state}_{user_id}_init` and sends the user to
//! `/spotify_exchange`. The exchange redirects to Spotify, the callback trades
//! the code for tokens, and bots later read a valid access token through
//! [`SpotifyOAuth::token`].

use crate::SpotifyConfig;
use base64::Engine;
use meridian_error::{ApiError, ApiErrorKind, ConfigError, HttpError, MeridianResult};
use meridian_fetch::{Body, HttpRequest, SharedHttp};
use meridian_kv::{KvJsonExt, KvStore, SharedKv};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PENDING_TTL: Duration = Duration::from_secs(600);
const EXCHANGE_TTL: Duration = Duration::from_secs(60);
const REFRESH_MARGIN_SECS: i64 = 60;
const INVALID_STATE: &str = "Invalid state. Use a URL intended for you.";

/// Scopes requested from every user.
pub const SCOPES: &[&str] = &[
    "user-read-private",
    "user-top-read",
    "user-read-recently-played",
    "user-follow-read",
    "user-library-read",
    "user-read-currently-playing",
    "user-read-playback-state",
    "user-read-playback-position",
    "playlist-read-collaborative",
    "playlist-read-private",
    "user-follow-modify",
    "user-library-modify",
    "user-modify-playback-state",
    "playlist-modify-public",
    "playlist-modify-private",
    "ugc-image-upload",
];

/// KV key a bot writes before sending the user to the exchange.
pub fn init_key(state: &str, user_id: u64) -> String {
    format!("sp_exchange_{}_{}_init", state, user_id)
}

/// KV key the bot polls for the finished exchange.
pub fn exchange_key(state: &str, user_id: u64) -> String {
    format!("sp_exchange_{}_{}", state, user_id)
}

/// KV key of a user's stored token.
pub fn token_key(user_id: u64) -> String {
    format!("spotify_token:{}", user_id)
}

fn pending_key(auth_state: &str) -> String {
    format!("sp_auth:{}", auth_state)
}

/// Written by a bot under [`init_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeInit {
    /// State the bot generated
    pub state: String,
    /// Discord user being linked
    pub user_id: u64,
    /// Where to send the user after linking
    #[serde(default)]
    pub rebound_url: Option<String>,
}

/// An in-flight authorization, keyed by the state sent to Spotify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingAuth {
    init_state: String,
    user_id: u64,
    rebound_url: Option<String>,
}

/// A stored user token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token for the Web API
    pub access_token: String,
    /// Token used to mint new access tokens
    pub refresh_token: String,
    /// Expiry as a Unix timestamp
    pub expires_at: i64,
    /// Granted scopes, space separated
    pub scope: String,
    /// Usually `Bearer`
    pub token_type: String,
}

impl TokenRecord {
    /// Whether the token expires within the refresh margin of `now`.
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.expires_at - now <= REFRESH_MARGIN_SECS
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_record(self, now: i64, previous_refresh: Option<&str>) -> MeridianResult<TokenRecord> {
        let refresh_token = self
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string))
            .ok_or_else(|| HttpError::new("Token response carried no refresh token"))?;
        Ok(TokenRecord {
            access_token: self.access_token,
            refresh_token,
            expires_at: now + self.expires_in,
            scope: self.scope.unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
        })
    }
}

/// What the callback tells the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Send the user here
    Redirect(String),
    /// Linked; no rebound target
    Connected,
}

/// Spotify authorization-code client.
pub struct SpotifyOAuth {
    kv: SharedKv,
    http: SharedHttp,
    config: SpotifyConfig,
}

impl std::fmt::Debug for SpotifyOAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyOAuth")
            .field("client_id", self.config.client_id())
            .field("redirect_uri", self.config.redirect_uri())
            .finish_non_exhaustive()
    }
}

impl SpotifyOAuth {
    /// Client over the KV and an HTTP client.
    pub fn new(kv: SharedKv, http: SharedHttp, config: SpotifyConfig) -> Self {
        Self { kv, http, config }
    }

    fn credentials(&self) -> MeridianResult<(&str, &str)> {
        match (self.config.client_id(), self.config.client_secret()) {
            (Some(id), Some(secret)) => Ok((id.as_str(), secret.as_str())),
            _ => Err(ConfigError::new("Spotify client credentials are not configured").into()),
        }
    }

    /// Start linking `user_id` for a bot-issued `state`. Returns the
    /// authorization URL to redirect to.
    #[tracing::instrument(skip(self))]
    pub async fn exchange(&self, state: &str, user_id: u64) -> MeridianResult<String> {
        let init: ExchangeInit = self
            .kv
            .get_json(&init_key(state, user_id))
            .await?
            .ok_or_else(|| ApiError::new(ApiErrorKind::Validation(INVALID_STATE.into())))?;
        let (client_id, _) = self.credentials()?;

        let auth_state = uuid::Uuid::new_v4().simple().to_string();
        let pending = PendingAuth {
            init_state: init.state,
            user_id: init.user_id,
            rebound_url: init.rebound_url,
        };
        self.kv
            .set_json(&pending_key(&auth_state), &pending, Some(PENDING_TTL))
            .await?;

        let scope = SCOPES.join(" ");
        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", client_id),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri().as_str()),
                ("scope", scope.as_str()),
                ("state", auth_state.as_str()),
            ],
        )
        .map_err(|e| ConfigError::new(format!("Invalid authorize URL: {}", e)))?;
        tracing::info!(user_id, "Spotify authorization started");
        Ok(url.to_string())
    }

    /// Finish an authorization Spotify redirected back with.
    #[tracing::instrument(skip(self, code))]
    pub async fn callback(&self, code: &str, state: &str) -> MeridianResult<CallbackOutcome> {
        let key = pending_key(state);
        let pending: PendingAuth = self
            .kv
            .get_json(&key)
            .await?
            .ok_or_else(|| ApiError::new(ApiErrorKind::Validation(INVALID_STATE.into())))?;
        self.kv.del(&key).await?;

        let response = self
            .token_request(vec![
                ("grant_type".into(), "authorization_code".into()),
                ("code".into(), code.to_string()),
                ("redirect_uri".into(), self.config.redirect_uri().clone()),
            ])
            .await?;
        if !response.is_success() {
            return Err(HttpError::status(response.status, "Spotify rejected the authorization code").into());
        }
        let record = response
            .json::<TokenResponse>()?
            .into_record(chrono::Utc::now().timestamp(), None)?;

        self.kv
            .set_json(
                &exchange_key(&pending.init_state, pending.user_id),
                &record,
                Some(EXCHANGE_TTL),
            )
            .await?;
        self.kv
            .set_json(&token_key(pending.user_id), &record, None)
            .await?;
        tracing::info!(user_id = pending.user_id, "Spotify account linked");

        Ok(match pending.rebound_url {
            Some(url) => CallbackOutcome::Redirect(url),
            None => CallbackOutcome::Connected,
        })
    }

    /// A valid token for `user_id`, refreshed when close to expiry.
    ///
    /// A refresh Spotify rejects removes the stored token.
    #[tracing::instrument(skip(self))]
    pub async fn token(&self, user_id: u64) -> MeridianResult<TokenRecord> {
        let key = token_key(user_id);
        let record: TokenRecord = self
            .kv
            .get_json(&key)
            .await?
            .ok_or_else(|| ApiError::new(ApiErrorKind::NotFound(format!("spotify:{}", user_id))))?;

        let now = chrono::Utc::now().timestamp();
        if !record.needs_refresh(now) {
            return Ok(record);
        }

        let response = self
            .token_request(vec![
                ("grant_type".into(), "refresh_token".into()),
                ("refresh_token".into(), record.refresh_token.clone()),
            ])
            .await?;
        if matches!(response.status, 400 | 401) {
            self.kv.del(&key).await?;
            tracing::warn!(user_id, status = response.status, "Spotify refresh rejected");
            return Err(ApiError::new(ApiErrorKind::AuthRevoked(format!("spotify:{}", user_id))).into());
        }
        if !response.is_success() {
            return Err(HttpError::status(response.status, "Spotify token refresh failed").into());
        }

        let refreshed = response
            .json::<TokenResponse>()?
            .into_record(now, Some(&record.refresh_token))?;
        self.kv.set_json(&key, &refreshed, None).await?;
        tracing::debug!(user_id, "Spotify token refreshed");
        Ok(refreshed)
    }

    async fn token_request(&self, fields: Vec<(String, String)>) -> MeridianResult<meridian_fetch::HttpResponse> {
        let (client_id, client_secret) = self.credentials()?;
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", client_id, client_secret));
        self.http
            .send(
                HttpRequest::post(TOKEN_URL, Body::Form(fields))
                    .header("Authorization", format!("Basic {}", basic)),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_margin() {
        let record = TokenRecord {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: 1_000,
            scope: String::new(),
            token_type: "Bearer".into(),
        };
        assert!(!record.needs_refresh(900));
        assert!(record.needs_refresh(940));
        assert!(record.needs_refresh(2_000));
    }

    #[test]
    fn test_refresh_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new".into(),
            refresh_token: None,
            expires_in: 3_600,
            scope: None,
            token_type: None,
        };
        let record = response.into_record(100, Some("old")).unwrap();
        assert_eq!(record.refresh_token, "old");
        assert_eq!(record.expires_at, 3_700);
        assert_eq!(record.token_type, "Bearer");
    }

    #[test]
    fn test_keys() {
        assert_eq!(init_key("s", 7), "sp_exchange_s_7_init");
        assert_eq!(exchange_key("s", 7), "sp_exchange_s_7");
        assert_eq!(token_key(7), "spotify_token:7");
    }
}
