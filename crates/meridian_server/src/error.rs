//! Error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use meridian_error::{ErrorClass, MeridianError};
use serde::Serialize;
use uuid::Uuid;

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Error class, e.g. `not found`
    pub error: String,
    /// Request id, present on internal errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Full error text when the server runs in debug mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A failed request on its way to the client.
#[derive(Debug)]
pub struct ApiFailure {
    error: MeridianError,
    request_id: Uuid,
    debug: bool,
}

impl ApiFailure {
    /// Wrap an error raised while handling request `request_id`.
    pub fn new(error: MeridianError, request_id: Uuid, debug: bool) -> Self {
        Self {
            error,
            request_id,
            debug,
        }
    }

    /// Class of the wrapped error.
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.class().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn body(&self) -> ErrorBody {
        let class = self.class();
        ErrorBody {
            error: class.to_string(),
            request_id: (class == ErrorClass::Fatal).then(|| self.request_id.to_string()),
            detail: self.debug.then(|| self.error.to_string()),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.class() == ErrorClass::Fatal {
            tracing::error!(request_id = %self.request_id, error = %self.error, "Request failed");
        } else {
            tracing::debug!(request_id = %self.request_id, class = %self.class(), error = %self.error, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_error::{ApiError, ApiErrorKind, FetchError, FetchErrorKind, StorageError, StorageErrorKind};

    #[test]
    fn test_status_follows_class() {
        let id = Uuid::new_v4();
        let quota = ApiFailure::new(
            ApiError::new(ApiErrorKind::QuotaExceeded("instagram".into())).into(),
            id,
            false,
        );
        assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);

        let timeout = ApiFailure::new(
            FetchError::new(FetchErrorKind::UpstreamTimeout("instastory:kat".into())).into(),
            id,
            false,
        );
        assert_eq!(timeout.status(), StatusCode::NOT_FOUND);
        assert_eq!(timeout.body().detail, None);
    }

    #[test]
    fn test_fatal_carries_request_id() {
        let id = Uuid::new_v4();
        let failure = ApiFailure::new(
            StorageError::new(StorageErrorKind::FileWrite("disk full".into())).into(),
            id,
            false,
        );
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.body().request_id, Some(id.to_string()));
    }

    #[test]
    fn test_debug_adds_detail() {
        let failure = ApiFailure::new(
            FetchError::new(FetchErrorKind::Validation("bad username".into())).into(),
            Uuid::new_v4(),
            true,
        );
        let body = failure.body();
        assert_eq!(body.error, "validation");
        assert!(body.detail.is_some_and(|d| d.contains("bad username")));
    }
}
