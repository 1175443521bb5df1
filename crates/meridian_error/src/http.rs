//! HTTP error types.

/// HTTP error wrapping reqwest failures with source location.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("HTTP Error: {} at line {} in {}", message, line, file)]
pub struct HttpError {
    /// The underlying error message
    pub message: String,
    /// Upstream status code, when a response was received
    pub status: Option<u16>,
    /// Whether the failure was a client-side timeout
    pub timeout: bool,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl HttpError {
    /// Create a new HttpError with the given message at the current location.
    ///
    /// # Examples
    ///
    /// ```
    /// use meridian_error::HttpError;
    ///
    /// let err = HttpError::new("Connection refused");
    /// assert!(err.message.contains("Connection refused"));
    /// assert!(err.status.is_none());
    /// ```
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            status: None,
            timeout: false,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Create an error for a non-success upstream status.
    #[track_caller]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(message);
        err.status = Some(status);
        err
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for HttpError {
    #[track_caller]
    fn from(err: reqwest::Error) -> Self {
        let mut out = HttpError::new(err.to_string());
        out.status = err.status().map(|s| s.as_u16());
        out.timeout = err.is_timeout();
        out
    }
}
