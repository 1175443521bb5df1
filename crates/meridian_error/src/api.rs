//! Auth, quota, and request-level error types.

/// Request-level failure conditions raised by the auth and quota layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ApiErrorKind {
    /// No bearer token, or the token maps to no account
    #[display("Unauthorized")]
    Unauthorized,
    /// Authenticated but not allowed on this route
    #[display("Forbidden: {}", _0)]
    Forbidden(String),
    /// A per-account limit tripped
    #[display("Quota exceeded: {}", _0)]
    QuotaExceeded(String),
    /// Malformed request
    #[display("Bad request: {}", _0)]
    Validation(String),
    /// Nothing to return
    #[display("Not found: {}", _0)]
    NotFound(String),
    /// A stored OAuth token could not be refreshed
    #[display("Authorization revoked: {}", _0)]
    AuthRevoked(String),
    /// The route deadline elapsed
    #[display("Timed out: {}", _0)]
    Timeout(String),
}

/// API error with source location tracking.
///
/// # Examples
///
/// ```
/// use meridian_error::{ApiError, ApiErrorKind};
///
/// let err = ApiError::new(ApiErrorKind::QuotaExceeded("instagram".into()));
/// assert!(format!("{}", err).contains("Quota"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("API Error: {} at line {} in {}", kind, line, file)]
pub struct ApiError {
    /// The kind of error that occurred
    pub kind: ApiErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ApiError {
    /// Create a new ApiError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ApiErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
