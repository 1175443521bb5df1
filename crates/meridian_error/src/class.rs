//! Coarse error classification shared by every surface.

/// The externally visible category of an error.
///
/// The router turns a class into an HTTP status; the moderation surface turns it
/// into a user-facing embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ErrorClass {
    /// Malformed input (bad username, missing parameter).
    #[display("validation")]
    Validation,
    /// Upstream or cached negative result.
    #[display("not found")]
    NotFound,
    /// A per-account limiter tripped or the platform is disabled for the account.
    #[display("quota exceeded")]
    QuotaExceeded,
    /// A platform fetch exceeded its deadline.
    #[display("upstream timeout")]
    UpstreamTimeout,
    /// A retryable upstream failure that is never cached.
    #[display("bad gateway")]
    BadGateway,
    /// Missing or unknown API token.
    #[display("unauthorized")]
    Unauthorized,
    /// A stored OAuth token failed to refresh.
    #[display("auth revoked")]
    AuthRevoked,
    /// Blocked by a missing permission.
    #[display("permission denied")]
    PermissionDenied,
    /// The moderator is not above the target in the role hierarchy.
    #[display("moderation hierarchy")]
    ModerationHierarchy,
    /// A moderator tried to warn the bot.
    #[display("suicide prevention")]
    SuicidePrevention,
    /// Anything unexpected.
    #[display("fatal")]
    Fatal,
}

impl ErrorClass {
    /// HTTP status code used when this class reaches the router.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::Validation => 400,
            ErrorClass::NotFound | ErrorClass::UpstreamTimeout => 404,
            ErrorClass::QuotaExceeded => 429,
            ErrorClass::BadGateway => 502,
            ErrorClass::Unauthorized | ErrorClass::AuthRevoked => 401,
            ErrorClass::PermissionDenied
            | ErrorClass::ModerationHierarchy
            | ErrorClass::SuicidePrevention => 403,
            ErrorClass::Fatal => 500,
        }
    }

    /// Whether a fetcher result with this class may be written as a negative cache entry.
    pub fn is_negative_cacheable(&self) -> bool {
        matches!(self, ErrorClass::NotFound | ErrorClass::UpstreamTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorClass::Validation.status_code(), 400);
        assert_eq!(ErrorClass::NotFound.status_code(), 404);
        assert_eq!(ErrorClass::UpstreamTimeout.status_code(), 404);
        assert_eq!(ErrorClass::QuotaExceeded.status_code(), 429);
        assert_eq!(ErrorClass::Fatal.status_code(), 500);
    }

    #[test]
    fn test_negative_cacheable() {
        assert!(ErrorClass::NotFound.is_negative_cacheable());
        assert!(ErrorClass::UpstreamTimeout.is_negative_cacheable());
        assert!(!ErrorClass::BadGateway.is_negative_cacheable());
        assert!(!ErrorClass::Fatal.is_negative_cacheable());
    }
}
