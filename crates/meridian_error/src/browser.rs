//! Browser automation error types.

/// Browser context pool and DevTools protocol error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum BrowserErrorKind {
    /// Could not open the DevTools websocket
    #[display("DevTools connection failed: {}", _0)]
    Connection(String),
    /// The browser answered a command with an error
    #[display("DevTools protocol error in {}: {}", method, message)]
    Protocol {
        /// Command that failed
        method: String,
        /// Message returned by the browser
        message: String,
    },
    /// Navigation did not complete
    #[display("Navigation failed: {}", _0)]
    Navigation(String),
    /// A borrow, navigation, or interceptor exceeded its deadline
    #[display("Browser operation timed out: {}", _0)]
    Timeout(String),
    /// Script evaluation threw
    #[display("Evaluation failed: {}", _0)]
    Evaluation(String),
    /// The context's session is no longer authenticated
    #[display("Authentication revoked for {}", _0)]
    AuthRevoked(String),
    /// No context could be borrowed
    #[display("No browser context available: {}", _0)]
    Unavailable(String),
    /// The underlying page or context was closed
    #[display("Browser target closed: {}", _0)]
    Closed(String),
}

/// Browser error with source location tracking.
///
/// # Examples
///
/// ```
/// use meridian_error::{BrowserError, BrowserErrorKind};
///
/// let err = BrowserError::new(BrowserErrorKind::Timeout("borrow".into()));
/// assert!(format!("{}", err).contains("timed out"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Browser Error: {} at line {} in {}", kind, line, file)]
pub struct BrowserError {
    /// The kind of error that occurred
    pub kind: BrowserErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl BrowserError {
    /// Create a new BrowserError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: BrowserErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Whether the failure means the context must be discarded.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            BrowserErrorKind::AuthRevoked(_) | BrowserErrorKind::Closed(_) | BrowserErrorKind::Connection(_)
        )
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for BrowserError {
    #[track_caller]
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BrowserError::new(BrowserErrorKind::Connection(err.to_string()))
    }
}
