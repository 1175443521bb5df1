//! Third-party fetcher error types.

/// Fetcher failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum FetchErrorKind {
    /// The identifier failed platform validation
    #[display("Invalid input: {}", _0)]
    Validation(String),
    /// The upstream has no such resource, or a negative entry is cached
    #[display("Not found: {}", _0)]
    NotFound(String),
    /// The route deadline elapsed
    #[display("Upstream timed out: {}", _0)]
    UpstreamTimeout(String),
    /// The upstream failed in a way worth retrying later
    #[display("Upstream error: {}", _0)]
    Upstream(String),
    /// The upstream payload did not match the expected schema
    #[display("Unexpected upstream payload: {}", _0)]
    Parse(String),
    /// The platform is disabled for this account
    #[display("Platform disabled: {}", _0)]
    Disabled(String),
}

/// Fetcher error with source location tracking.
///
/// # Examples
///
/// ```
/// use meridian_error::{FetchError, FetchErrorKind};
///
/// let err = FetchError::new(FetchErrorKind::Validation("username too long".into()));
/// assert!(format!("{}", err).contains("Invalid input"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Fetch Error: {} at line {} in {}", kind, line, file)]
pub struct FetchError {
    /// The kind of error that occurred
    pub kind: FetchErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl FetchError {
    /// Create a new FetchError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: FetchErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
