//! Cash App profiles from the `$cashtag` page.

use crate::FetchContext;
use crate::canonical::{GENERIC_USERNAME, validate_username};
use crate::embedded::{js_global, next_data};
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::records::MediaRef;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAG: &str = "Cashapp";

/// Profile as returned by `/api/cashapp/{user}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashappProfile {
    /// Display name
    pub display_name: Option<String>,
    /// `$cashtag`
    pub formatted_cashtag: String,
    /// Verified account
    pub is_verified_account: bool,
    /// Cached avatar
    pub avatar: Option<MediaRef>,
    /// Payment QR code image
    pub qr_image_url: Option<String>,
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(String::from)
}

/// The og:image entry of the page's `metaTags` list.
fn qr_image(next: &Value) -> Option<String> {
    next.pointer("/props/pageProps/metaTags")?
        .as_array()?
        .iter()
        .find(|tag| tag.get("property").and_then(Value::as_str) == Some("og:image"))
        .and_then(|tag| str_at(tag, "/content"))
}

/// `GET /api/cashapp/{user}`.
#[derive(Debug, Default)]
pub struct CashappUser;

#[async_trait]
impl Fetcher for CashappUser {
    fn route(&self) -> &'static str {
        "cashapp.profile"
    }

    fn platform(&self) -> &'static str {
        "cashapp"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(90)).with_timeout(Duration::from_secs(15))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        validate_username(request.target.trim_start_matches('$'), GENERIC_USERNAME).map(|u| u.to_lowercase())
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("cashapp:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let html = cx.get_text(&format!("https://cash.app/${}", id)).await?;
        let Ok(profile) = js_global(&html, "profile") else {
            return Ok(FetchOutcome::NotFound);
        };
        let Some(cashtag) = str_at(&profile, "/formatted_cashtag") else {
            return Ok(FetchOutcome::NotFound);
        };
        let next = next_data(&html).unwrap_or(Value::Null);
        let avatar = cx
            .try_image(str_at(&profile, "/avatar/image_url").as_deref(), TAG, false)
            .await;
        found(&CashappProfile {
            display_name: str_at(&profile, "/display_name"),
            formatted_cashtag: cashtag,
            is_verified_account: profile
                .get("is_verified_account")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            avatar,
            qr_image_url: qr_image(&next),
        })
    }
}
