//! Media render pipeline error types.

/// Render failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum RenderErrorKind {
    /// The source could not be downloaded
    #[display("Download failed: {}", _0)]
    Download(String),
    /// The payload is not a recognised image, video, or audio stream
    #[display("Invalid payload for {}", _0)]
    InvalidPayload(String),
    /// HEIC sources are refused before download
    #[display("HEIC source refused: {}", _0)]
    HeicRejected(String),
    /// Re-encoding or ffmpeg processing failed
    #[display("Transcode failed: {}", _0)]
    Transcode(String),
    /// The render exceeded its deadline
    #[display("Render timed out: {}", _0)]
    Timeout(String),
    /// A recent render of this filename failed and is negatively cached
    #[display("Render negatively cached: {}", _0)]
    NegativeCached(String),
    /// Writing the artifact failed
    #[display("Artifact write failed: {}", _0)]
    Store(String),
}

/// Render error with source location tracking.
///
/// # Examples
///
/// ```
/// use meridian_error::{RenderError, RenderErrorKind};
///
/// let err = RenderError::new(RenderErrorKind::HeicRejected("photo.heic".into()));
/// assert!(format!("{}", err).contains("HEIC"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Render Error: {} at line {} in {}", kind, line, file)]
pub struct RenderError {
    /// The kind of error that occurred
    pub kind: RenderErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl RenderError {
    /// Create a new RenderError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: RenderErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
