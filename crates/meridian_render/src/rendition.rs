//! Choosing among the renditions a platform offers for one image.

use meridian_storage::is_heic_url;
use serde::{Deserialize, Serialize};

/// One size of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Source URL
    pub url: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Rendition {
    /// Create a rendition.
    pub fn new(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
        }
    }

    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Pick `(principal, preview)`: the largest rendition and the middle-sized one.
///
/// HEIC renditions are never picked. `None` when nothing usable remains.
pub fn principal_and_preview(renditions: &[Rendition]) -> Option<(&Rendition, &Rendition)> {
    let mut usable: Vec<&Rendition> = renditions.iter().filter(|r| !is_heic_url(&r.url)).collect();
    usable.sort_by_key(|r| r.area());
    let principal = *usable.last()?;
    let preview = usable[usable.len() / 2];
    Some((principal, preview))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_and_middle() {
        let renditions = vec![
            Rendition::new("https://cdn/640.jpg", 640, 640),
            Rendition::new("https://cdn/1080.jpg", 1080, 1080),
            Rendition::new("https://cdn/150.jpg", 150, 150),
            Rendition::new("https://cdn/1440.heic", 1440, 1440),
        ];
        let (principal, preview) = principal_and_preview(&renditions).unwrap();
        assert_eq!(principal.width, 1080);
        assert_eq!(preview.width, 640);
    }

    #[test]
    fn test_single_and_empty() {
        let one = vec![Rendition::new("https://cdn/a.jpg", 10, 10)];
        let (p, v) = principal_and_preview(&one).unwrap();
        assert_eq!(p, v);
        assert!(principal_and_preview(&[]).is_none());
    }
}
