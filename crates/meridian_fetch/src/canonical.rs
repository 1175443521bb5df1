//! Input validation and URL canonicalization.

use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).expect("Valid link regex"));

/// Query parameters that only track the sharer.
const TRACKING_PARAMS: &[&str] = &["igshid", "igsh", "img_index", "si", "is_from_webapp", "sender_device"];

fn invalid(message: impl Into<String>) -> FetchError {
    FetchError::new(FetchErrorKind::Validation(message.into()))
}

/// Every http(s) link in free text, in order of appearance.
pub fn find_links(text: &str) -> Vec<String> {
    LINK_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', '!', '?']).to_string())
        .collect()
}

/// First link in `text` whose host contains one of `hosts`.
pub fn find_link(text: &str, hosts: &[&str]) -> Option<String> {
    find_links(text).into_iter().find(|link| {
        Url::parse(link)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| hosts.iter().any(|h| host.contains(h)))
    })
}

/// Remove tracking query parameters (`igshid`, `utm_*`, `img_index`, ...).
///
/// An emptied query string is dropped entirely. Unparseable input comes back
/// unchanged.
pub fn strip_tracking(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Canonical form of an Instagram or Threads post URL.
///
/// Tracking parameters are removed, `/reel/` and `/reels/` become `/p/`, and
/// the trailing slash is dropped.
pub fn canonical_instagram_url(url: &str) -> String {
    let stripped = strip_tracking(url.trim());
    let rewritten = stripped
        .replacen("instagram.com/reels/", "instagram.com/p/", 1)
        .replacen("instagram.com/reel/", "instagram.com/p/", 1)
        .replacen("://instagram.com/", "://www.instagram.com/", 1);
    rewritten.trim_end_matches('/').to_string()
}

/// Rules for a platform's usernames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameRules {
    /// Platform name used in error messages
    pub platform: &'static str,
    /// Maximum length
    pub max_len: usize,
    /// Whether usernames are case-insensitive and stored lowercase
    pub lowercase: bool,
}

/// Instagram: ≤30 chars, lowercase.
pub const INSTAGRAM_USERNAME: UsernameRules = UsernameRules {
    platform: "Instagram",
    max_len: 30,
    lowercase: true,
};

/// TikTok: ≤24 chars, case preserved.
pub const TIKTOK_USERNAME: UsernameRules = UsernameRules {
    platform: "TikTok",
    max_len: 24,
    lowercase: false,
};

/// Generic handle: ≤50 chars, case preserved.
pub const GENERIC_USERNAME: UsernameRules = UsernameRules {
    platform: "This platform",
    max_len: 50,
    lowercase: false,
};

/// Clean and validate a username.
///
/// Strips stray `'b` byte-string markers, quotes and a leading `@`; allows
/// alphanumerics, `_` and `.`, but no trailing `.`.
pub fn validate_username(raw: &str, rules: UsernameRules) -> MeridianResult<String> {
    let mut name = raw.trim().replace("'b", "").replace(['\'', '"'], "");
    if rules.lowercase {
        name = name.to_lowercase();
    }
    let name = name.strip_prefix('@').unwrap_or(&name).to_string();

    if name.is_empty() {
        return Err(invalid("Usernames cannot be empty").into());
    }
    if name.chars().count() > rules.max_len {
        return Err(invalid(format!(
            "{} usernames must be less than {} characters",
            rules.platform, rules.max_len
        ))
        .into());
    }
    if name.ends_with('.') {
        return Err(invalid("Usernames cannot end with periods").into());
    }
    if let Some(c) = name.chars().find(|c| !c.is_alphanumeric() && *c != '_' && *c != '.') {
        return Err(invalid(format!("{} is not allowed in {} usernames", c, rules.platform)).into());
    }
    Ok(name)
}

/// Validate a purely numeric identifier.
pub fn validate_numeric_id(raw: &str) -> MeridianResult<String> {
    let id = raw.trim();
    if id.is_empty() || id.len() > 32 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("{} is not a valid id", id)).into());
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_share_url_canonical() {
        assert_eq!(
            canonical_instagram_url("https://www.instagram.com/p/CxxxxxxxxxY/?igshid=abc"),
            "https://www.instagram.com/p/CxxxxxxxxxY"
        );
        assert_eq!(
            canonical_instagram_url("https://www.instagram.com/reel/CxxxxxxxxxY/?utm_source=ig_web_copy_link"),
            "https://www.instagram.com/p/CxxxxxxxxxY"
        );
    }

    #[test]
    fn test_strip_keeps_meaningful_params() {
        assert_eq!(
            strip_tracking("https://x.example/a?id=3&utm_medium=x&img_index=2"),
            "https://x.example/a?id=3"
        );
        assert_eq!(strip_tracking("not a url"), "not a url");
    }

    #[test]
    fn test_find_link_by_host() {
        let text = "look at this https://www.tiktok.com/@a/video/1 and https://instagram.com/p/x!";
        assert_eq!(
            find_link(text, &["instagram.com"]).as_deref(),
            Some("https://instagram.com/p/x")
        );
        assert!(find_link("no links here", &["tiktok.com"]).is_none());
    }

    #[test]
    fn test_username_rules() {
        assert_eq!(validate_username("@NASA", INSTAGRAM_USERNAME).unwrap(), "nasa");
        assert_eq!(validate_username("'b'Some.One_'", TIKTOK_USERNAME).unwrap(), "Some.One_");
        assert!(validate_username("trailing.", INSTAGRAM_USERNAME).is_err());
        assert!(validate_username("has space", INSTAGRAM_USERNAME).is_err());
        assert!(validate_username(&"a".repeat(31), INSTAGRAM_USERNAME).is_err());
        assert!(validate_username(&"a".repeat(25), TIKTOK_USERNAME).is_err());
        assert!(validate_username("@", INSTAGRAM_USERNAME).is_err());
    }

    #[test]
    fn test_numeric_id() {
        assert_eq!(validate_numeric_id(" 17912345 ").unwrap(), "17912345");
        assert!(validate_numeric_id("12a").is_err());
    }

    proptest! {
        #[test]
        fn test_share_variants_share_canonical(
            code in "[A-Za-z0-9_-]{11}",
            igshid in "[A-Za-z0-9=]{4,16}",
            utm in "[a-z_]{3,12}",
        ) {
            let base = format!("https://www.instagram.com/p/{}", code);
            let variants = [
                format!("https://www.instagram.com/p/{}/", code),
                format!("https://www.instagram.com/p/{}/?igshid={}", code, igshid),
                format!("https://www.instagram.com/p/{}/?utm_source={}", code, utm),
                format!("https://www.instagram.com/reel/{}/", code),
                format!("https://www.instagram.com/reels/{}/?igshid={}&utm_medium={}", code, igshid, utm),
            ];
            for variant in variants {
                prop_assert_eq!(canonical_instagram_url(&variant), base.clone());
            }
        }
    }
}
