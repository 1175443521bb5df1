//! Telegram public profiles from the `t.me` preview page.

use crate::FetchContext;
use crate::canonical::{GENERIC_USERNAME, validate_username};
use crate::embedded::meta_content;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "Telegram";
/// Descriptions Telegram shows for accounts without a bio.
const BOILERPLATE: [&str; 2] = ["You can contact @", "You can view and join"];

/// Profile as returned by `/api/web/telegram/{user}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramProfile {
    /// Handle
    pub username: String,
    /// Display name
    pub title: String,
    /// Bio, when set
    pub description: Option<String>,
    /// Cached avatar
    pub avatar: Option<MediaRef>,
}

fn description(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && !BOILERPLATE.iter().any(|b| d.starts_with(b)))
}

/// `GET /api/web/telegram/{user}`.
#[derive(Debug, Default)]
pub struct TelegramUser;

#[async_trait]
impl Fetcher for TelegramUser {
    fn route(&self) -> &'static str {
        "telegram.profile"
    }

    fn platform(&self) -> &'static str {
        "telegram"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(120)).with_timeout(Duration::from_secs(15))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(&request.target, GENERIC_USERNAME).map(|u| u.to_lowercase())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("telegram:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let html = cx.get_text(&format!("https://t.me/{}", id)).await?;
        let Some(title) = meta_content(&html, "og:title").filter(|t| !t.starts_with("Telegram: Contact")) else {
            return Ok(FetchOutcome::NotFound);
        };
        let avatar = cx.try_image(meta_content(&html, "og:image").as_deref(), TAG, false).await;
        found(&TelegramProfile {
            username: id.to_string(),
            title,
            description: description(meta_content(&html, "og:description")),
            avatar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boilerplate_description_blanked() {
        assert_eq!(description(Some("You can contact @durov right away.".into())), None);
        assert_eq!(description(Some("You can view and join @news right away.".into())), None);
        assert_eq!(description(Some("  ".into())), None);
        assert_eq!(description(Some("Founder".into())).as_deref(), Some("Founder"));
    }
}
