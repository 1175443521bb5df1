//! Media type enumeration.

/// Type of media content.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Image content (JPEG, PNG, WebP, GIF)
    #[display("image")]
    Image,
    /// Audio content (MP3, M4A, OGG)
    #[display("audio")]
    Audio,
    /// Video content (MP4, MOV, WebM)
    #[display("video")]
    Video,
}

impl MediaType {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }

    /// Suffix used when the URL does not reveal one.
    pub fn default_suffix(&self) -> &'static str {
        match self {
            MediaType::Image => ".jpg",
            MediaType::Audio => ".mp3",
            MediaType::Video => ".mp4",
        }
    }

    /// Classify a mime type such as `image/jpeg` or `video/mp4`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split('/').next()? {
            "image" => Some(MediaType::Image),
            "audio" => Some(MediaType::Audio),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }

    /// Classify a cache filename by its extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        Self::from_mime(&mime_for_filename(filename))
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            _ => Err(format!("Unknown media type: {}", s)),
        }
    }
}

/// Mime type implied by a filename's extension.
pub fn mime_for_filename(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
