//! Top-level error wrapper types.

use crate::{
    ApiError, ApiErrorKind, BrowserError, BrowserErrorKind, ConfigError, DatabaseError,
    DatabaseErrorKind, ErrorClass, FetchError, FetchErrorKind, HttpError, JsonError, KvError,
    ModerationError, ModerationErrorKind, RenderError, RenderErrorKind, StorageError,
    StorageErrorKind,
};

/// Every error the workspace can produce.
///
/// # Examples
///
/// ```
/// use meridian_error::{MeridianError, HttpError};
///
/// let http_err = HttpError::new("Connection failed");
/// let err: MeridianError = http_err.into();
/// assert!(format!("{}", err).contains("HTTP Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum MeridianErrorKind {
    /// HTTP error
    #[from(HttpError)]
    Http(HttpError),
    /// JSON serialization/deserialization error
    #[from(JsonError)]
    Json(JsonError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Object cache storage error
    #[from(StorageError)]
    Storage(StorageError),
    /// Key-value store error
    #[from(KvError)]
    Kv(KvError),
    /// Relational store error
    #[from(DatabaseError)]
    Database(DatabaseError),
    /// Browser context pool error
    #[from(BrowserError)]
    Browser(BrowserError),
    /// Render pipeline error
    #[from(RenderError)]
    Render(RenderError),
    /// Third-party fetcher error
    #[from(FetchError)]
    Fetch(FetchError),
    /// Moderation core error
    #[from(ModerationError)]
    Moderation(ModerationError),
    /// Auth and quota error
    #[from(ApiError)]
    Api(ApiError),
}

/// Meridian error with kind discrimination.
///
/// # Examples
///
/// ```
/// use meridian_error::{MeridianError, MeridianResult, ConfigError};
///
/// fn might_fail() -> MeridianResult<()> {
///     Err(ConfigError::new("Missing field"))?
/// }
///
/// match might_fail() {
///     Ok(_) => println!("Success"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Meridian Error: {}", _0)]
pub struct MeridianError(Box<MeridianErrorKind>);

impl MeridianError {
    /// Create a new error from a kind.
    pub fn new(kind: MeridianErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &MeridianErrorKind {
        &self.0
    }

    /// The moderation failure, when this is one.
    pub fn moderation_kind(&self) -> Option<&ModerationErrorKind> {
        match self.kind() {
            MeridianErrorKind::Moderation(e) => Some(&e.kind),
            _ => None,
        }
    }

    /// Project this error onto its externally visible class.
    pub fn class(&self) -> ErrorClass {
        match self.kind() {
            MeridianErrorKind::Http(e) => {
                if e.timeout {
                    ErrorClass::UpstreamTimeout
                } else if e.status == Some(404) {
                    ErrorClass::NotFound
                } else {
                    ErrorClass::BadGateway
                }
            }
            MeridianErrorKind::Json(_) => ErrorClass::BadGateway,
            MeridianErrorKind::Config(_) | MeridianErrorKind::Kv(_) => ErrorClass::Fatal,
            MeridianErrorKind::Storage(e) => match e.kind {
                StorageErrorKind::NotFound(_) | StorageErrorKind::InvalidKey(_) => {
                    ErrorClass::NotFound
                }
                _ => ErrorClass::Fatal,
            },
            MeridianErrorKind::Database(e) => match e.kind {
                DatabaseErrorKind::NotFound | DatabaseErrorKind::NotConfigured => {
                    ErrorClass::NotFound
                }
                _ => ErrorClass::Fatal,
            },
            MeridianErrorKind::Browser(e) => match e.kind {
                BrowserErrorKind::Timeout(_) | BrowserErrorKind::Unavailable(_) => {
                    ErrorClass::UpstreamTimeout
                }
                BrowserErrorKind::AuthRevoked(_) => ErrorClass::AuthRevoked,
                _ => ErrorClass::BadGateway,
            },
            MeridianErrorKind::Render(e) => match e.kind {
                RenderErrorKind::Timeout(_) => ErrorClass::UpstreamTimeout,
                RenderErrorKind::Store(_) => ErrorClass::Fatal,
                _ => ErrorClass::NotFound,
            },
            MeridianErrorKind::Fetch(e) => match e.kind {
                FetchErrorKind::Validation(_) => ErrorClass::Validation,
                FetchErrorKind::NotFound(_) => ErrorClass::NotFound,
                FetchErrorKind::UpstreamTimeout(_) => ErrorClass::UpstreamTimeout,
                FetchErrorKind::Upstream(_) | FetchErrorKind::Parse(_) => ErrorClass::BadGateway,
                FetchErrorKind::Disabled(_) => ErrorClass::QuotaExceeded,
            },
            MeridianErrorKind::Moderation(e) => match e.kind {
                ModerationErrorKind::SuicidePrevention => ErrorClass::SuicidePrevention,
                ModerationErrorKind::MemberTooHigh(_)
                | ModerationErrorKind::NotAllowedByHierarchy(_) => ErrorClass::ModerationHierarchy,
                ModerationErrorKind::MissingMuteRole
                | ModerationErrorKind::LostPermissions(_)
                | ModerationErrorKind::MissingPermissions(_) => ErrorClass::PermissionDenied,
                ModerationErrorKind::InvalidLevel(_) | ModerationErrorKind::ReasonTooLong(_) => {
                    ErrorClass::Validation
                }
                ModerationErrorKind::CaseNotFound(_)
                | ModerationErrorKind::MemberNotFound(_)
                | ModerationErrorKind::ModlogChannelNotFound(_) => ErrorClass::NotFound,
                ModerationErrorKind::Discord(_) | ModerationErrorKind::Store(_) => {
                    ErrorClass::Fatal
                }
            },
            MeridianErrorKind::Api(e) => match e.kind {
                ApiErrorKind::Unauthorized => ErrorClass::Unauthorized,
                ApiErrorKind::Forbidden(_) => ErrorClass::PermissionDenied,
                ApiErrorKind::QuotaExceeded(_) => ErrorClass::QuotaExceeded,
                ApiErrorKind::Validation(_) => ErrorClass::Validation,
                ApiErrorKind::NotFound(_) => ErrorClass::NotFound,
                ApiErrorKind::AuthRevoked(_) => ErrorClass::AuthRevoked,
                ApiErrorKind::Timeout(_) => ErrorClass::UpstreamTimeout,
            },
        }
    }
}

// Generic From implementation for any type that converts to MeridianErrorKind
impl<T> From<T> for MeridianError
where
    T: Into<MeridianErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Meridian operations.
///
/// # Examples
///
/// ```
/// use meridian_error::{MeridianResult, HttpError};
///
/// fn fetch_data() -> MeridianResult<String> {
///     Err(HttpError::status(404, "404 Not Found"))?
/// }
/// ```
pub type MeridianResult<T> = std::result::Result<T, MeridianError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_classify() {
        let err: MeridianError =
            FetchError::new(FetchErrorKind::Validation("bad".into())).into();
        assert_eq!(err.class(), ErrorClass::Validation);

        let err: MeridianError =
            FetchError::new(FetchErrorKind::UpstreamTimeout("instastory:x".into())).into();
        assert_eq!(err.class(), ErrorClass::UpstreamTimeout);
        assert_eq!(err.class().status_code(), 404);

        let err: MeridianError = FetchError::new(FetchErrorKind::Disabled("tiktok".into())).into();
        assert_eq!(err.class().status_code(), 429);
    }

    #[test]
    fn test_moderation_errors_classify() {
        let err: MeridianError = ModerationError::new(ModerationErrorKind::SuicidePrevention).into();
        assert_eq!(err.class(), ErrorClass::SuicidePrevention);

        let err: MeridianError =
            ModerationError::new(ModerationErrorKind::NotAllowedByHierarchy(42)).into();
        assert_eq!(err.class(), ErrorClass::ModerationHierarchy);
    }

    #[test]
    fn test_http_timeout_is_upstream_timeout() {
        let mut http = HttpError::new("deadline");
        http.timeout = true;
        let err: MeridianError = http.into();
        assert_eq!(err.class(), ErrorClass::UpstreamTimeout);
    }
}
