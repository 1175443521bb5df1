//! Platform-neutral response records.

use serde::{Deserialize, Serialize};

/// A media reference pointing into the object cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Cache filename
    pub filename: String,
    /// Public URL
    pub url: String,
}

/// Author of a post or owner of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Handle
    pub username: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Cached avatar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<MediaRef>,
    /// Verified badge
    #[serde(default)]
    pub is_verified: bool,
    /// Private account
    #[serde(default)]
    pub is_private: bool,
}

/// One child of a carousel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarouselMedia {
    /// Whether the child is a video
    pub is_video: bool,
    /// The child media (may still be rendering)
    pub media: Option<MediaRef>,
    /// Preview image (rendered before return)
    pub preview: Option<MediaRef>,
}

/// One media item of a post, story or highlight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostItem {
    /// Platform id
    pub id: String,
    /// Whether the principal media is a video
    pub is_video: bool,
    /// Principal image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaRef>,
    /// Principal video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaRef>,
    /// Preview image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<MediaRef>,
    /// Caption text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<i64>,
    /// Likes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    /// Comments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
    /// Views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    /// Carousel children
    #[serde(default)]
    pub sidecars: Vec<CarouselMedia>,
    /// Number of carousel children
    #[serde(default)]
    pub sidecar_count: usize,
}

/// A post, story or highlight: an author and its media items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    /// Canonical share URL
    pub share_url: String,
    /// Author
    pub author: Author,
    /// Items
    pub items: Vec<PostItem>,
    /// Number of items
    pub num_results: usize,
}

impl PostRecord {
    /// Finalise derived fields: counts, and ids trimmed at the first `_`.
    pub fn normalized(mut self) -> Self {
        for item in &mut self.items {
            if let Some((head, _)) = item.id.split_once('_') {
                item.id = head.to_string();
            }
            item.sidecar_count = item.sidecars.len();
        }
        self.num_results = self.items.len();
        self
    }
}

/// Index of carousel preview for `len` children.
pub fn carousel_preview_index(len: usize) -> usize {
    (len / 2).min(7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_trims_ids_and_counts() {
        let record = PostRecord {
            items: vec![PostItem {
                id: "3187_2211".into(),
                sidecars: vec![
                    CarouselMedia {
                        is_video: false,
                        media: None,
                        preview: None,
                    };
                    3
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
        .normalized();
        assert_eq!(record.items[0].id, "3187");
        assert_eq!(record.items[0].sidecar_count, 3);
        assert_eq!(record.num_results, 1);
    }

    #[test]
    fn test_carousel_preview_index() {
        assert_eq!(carousel_preview_index(1), 0);
        assert_eq!(carousel_preview_index(5), 2);
        assert_eq!(carousel_preview_index(20), 7);
    }
}
