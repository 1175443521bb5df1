//! Deterministic artifact filenames.

use crate::MediaType;
use xxhash_rust::xxh32::xxh32;

const KNOWN_SUFFIXES: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".webp", ".gif", ".heic", ".mp4", ".mov", ".webm", ".mp3", ".m4a",
    ".ogg",
];

/// Source URL with query string and fragment removed.
///
/// Signed CDN URLs change their query between fetches of the same object, so
/// only the path identifies it.
pub fn prekey_for(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Whether the URL points at a HEIC image.
pub fn is_heic_url(url: &str) -> bool {
    prekey_for(url).to_ascii_lowercase().ends_with(".heic")
}

/// Normalise a suffix: leading dot, lowercase, `.jpeg` and `.heic` as `.jpg`.
pub fn normalize_suffix(suffix: &str) -> String {
    let lower = suffix.trim().to_ascii_lowercase();
    let dotted = if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    };
    match dotted.as_str() {
        ".jpeg" | ".heic" => ".jpg".to_string(),
        _ => dotted,
    }
}

fn suffix_from_url(url: &str) -> Option<String> {
    let path = prekey_for(url);
    let last = path.rsplit('/').next()?;
    let dot = last.rfind('.')?;
    let ext = last[dot..].to_ascii_lowercase();
    KNOWN_SUFFIXES
        .contains(&ext.as_str())
        .then(|| normalize_suffix(&ext))
}

/// Build the cache filename `{tag}{xxh32(prekey)}{suffix}`.
///
/// `prekey` overrides the hashed value (callers pass a stable id when the
/// URL itself is unstable); `suffix` overrides the extension taken from the
/// URL, which in turn falls back to the media type's default.
pub fn artifact_filename(
    tag: &str,
    url: &str,
    prekey: Option<&str>,
    suffix: Option<&str>,
    kind: MediaType,
) -> String {
    let prekey = prekey.unwrap_or_else(|| prekey_for(url));
    let suffix = suffix
        .map(normalize_suffix)
        .or_else(|| suffix_from_url(url))
        .unwrap_or_else(|| kind.default_suffix().to_string());
    format!("{}{:08x}{}", tag, xxh32(prekey.as_bytes(), 0), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_ignored() {
        let a = artifact_filename(
            "Instagram",
            "https://scontent.cdninstagram.com/v/t51/123_n.jpg?stp=dst&_nc_ht=x",
            None,
            None,
            MediaType::Image,
        );
        let b = artifact_filename(
            "Instagram",
            "https://scontent.cdninstagram.com/v/t51/123_n.jpg?stp=other",
            None,
            None,
            MediaType::Image,
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), "Instagram".len() + 8 + ".jpg".len());
    }

    #[test]
    fn test_suffix_rules() {
        assert_eq!(normalize_suffix("jpeg"), ".jpg");
        assert_eq!(normalize_suffix(".HEIC"), ".jpg");
        assert_eq!(normalize_suffix(".mp4"), ".mp4");

        let heic = artifact_filename("Snap", "https://x/y/photo.heic", None, None, MediaType::Image);
        assert!(heic.ends_with(".jpg"));
        let video = artifact_filename("TikTok", "https://x/y/play", None, None, MediaType::Video);
        assert!(video.ends_with(".mp4"));
    }

    #[test]
    fn test_prekey_override() {
        let a = artifact_filename("TikTok", "https://a/1.mp4?x", Some("7123"), None, MediaType::Video);
        let b = artifact_filename("TikTok", "https://b/2.mp4", Some("7123"), None, MediaType::Video);
        assert_eq!(a, b);
    }

    #[test]
    fn test_heic_detection() {
        assert!(is_heic_url("https://cdn/x.HEIC?sig=1"));
        assert!(!is_heic_url("https://cdn/x.jpg?f=heic"));
    }
}
