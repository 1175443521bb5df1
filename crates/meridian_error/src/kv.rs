//! Key-value store error types.

/// Key-value store error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum KvErrorKind {
    /// Could not reach the store
    #[display("KV connection error: {}", _0)]
    Connection(String),
    /// A command was rejected
    #[display("KV command error: {}", _0)]
    Command(String),
    /// A stored value could not be decoded
    #[display("KV serialization error: {}", _0)]
    Serialization(String),
    /// The key holds a value of another type
    #[display("KV wrong type for key {}", _0)]
    WrongType(String),
}

/// Key-value store error with source location tracking.
///
/// # Examples
///
/// ```
/// use meridian_error::{KvError, KvErrorKind};
///
/// let err = KvError::new(KvErrorKind::WrongType("api_passive_url".into()));
/// assert!(format!("{}", err).contains("api_passive_url"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("KV Error: {} at line {} in {}", kind, line, file)]
pub struct KvError {
    /// The kind of error that occurred
    pub kind: KvErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl KvError {
    /// Create a new KvError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: KvErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

#[cfg(feature = "kv")]
impl From<redis::RedisError> for KvError {
    #[track_caller]
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() {
            KvError::new(KvErrorKind::Connection(err.to_string()))
        } else {
            KvError::new(KvErrorKind::Command(err.to_string()))
        }
    }
}
