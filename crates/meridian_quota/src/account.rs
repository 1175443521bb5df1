//! API accounts.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hex SHA-256 digest of a bearer token.
///
/// ```
/// use meridian_quota::hash_token;
///
/// assert_eq!(hash_token("abc").len(), 64);
/// assert_eq!(hash_token("abc"), hash_token("abc"));
/// ```
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// An API client allowed to call the service.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
pub struct ApiAccount {
    /// Account name, also the identity on the realtime bus
    name: String,
    /// Hex SHA-256 digest of the bearer token
    token_sha256: String,
    /// Platforms this account may query; empty or `*` means all
    #[serde(default)]
    #[builder(default)]
    scopes: Vec<String>,
    /// Requests per minute; `None` is unlimited
    #[serde(default)]
    #[builder(default)]
    rpm: Option<u32>,
    /// Per-platform concurrency overrides
    #[serde(default)]
    #[builder(default)]
    platform_limits: HashMap<String, u32>,
}

impl ApiAccount {
    /// Account with no limits beyond the defaults.
    pub fn new(name: impl Into<String>, token: &str) -> Self {
        Self {
            name: name.into(),
            token_sha256: hash_token(token),
            scopes: Vec::new(),
            rpm: None,
            platform_limits: HashMap::new(),
        }
    }

    /// Whether this account may query `platform`.
    pub fn allows(&self, platform: &str) -> bool {
        self.scopes.is_empty()
            || self
                .scopes
                .iter()
                .any(|s| s == "*" || s.eq_ignore_ascii_case(platform))
    }

    /// Whether `token` belongs to this account.
    pub fn matches_token(&self, token: &str) -> bool {
        self.token_sha256.eq_ignore_ascii_case(&hash_token(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes() {
        let open = ApiAccount::new("melanie", "t");
        assert!(open.allows("instagram"));

        let scoped = ApiAccount::new("bot", "t").with_scopes(vec!["tiktok".into()]);
        assert!(scoped.allows("TikTok"));
        assert!(!scoped.allows("instagram"));
    }

    #[test]
    fn test_token_match() {
        let account = ApiAccount::new("melanie", "secret");
        assert!(account.matches_token("secret"));
        assert!(!account.matches_token("Secret"));
    }
}
