//! Postgres failures behind the message cache archive.

/// What went wrong talking to Postgres.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum DatabaseErrorKind {
    /// Pool checkout or connect failed
    #[display("Postgres unreachable: {}", _0)]
    Connection(String),
    /// Statement rejected by the server
    #[display("Postgres rejected statement: {}", _0)]
    Query(String),
    /// A stored JSON column did not decode
    #[display("Archived row is not valid JSON: {}", _0)]
    Serialization(String),
    /// Embedded migrations did not apply
    #[display("Schema migration failed: {}", _0)]
    Migration(String),
    /// No archived row for the lookup
    #[display("No archived row")]
    NotFound,
    /// `database.url` is unset, archive routes are off
    #[display("Message archive disabled, no database.url")]
    NotConfigured,
}

/// Archive error, tagged with where it was raised.
///
/// ```
/// use meridian_error::{DatabaseError, DatabaseErrorKind, ErrorClass, MeridianError};
///
/// let err: MeridianError = DatabaseError::new(DatabaseErrorKind::NotConfigured).into();
/// assert_eq!(err.class(), ErrorClass::NotFound);
/// assert!(err.to_string().contains("database.url"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Database Error: {} at line {} in {}", kind, line, file)]
pub struct DatabaseError {
    /// Failure kind
    pub kind: DatabaseErrorKind,
    /// Raising line
    pub line: u32,
    /// Raising file
    pub file: &'static str,
}

impl DatabaseError {
    /// Tag `kind` with the caller's location.
    #[track_caller]
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

#[cfg(feature = "database")]
impl From<diesel::result::Error> for DatabaseError {
    #[track_caller]
    fn from(err: diesel::result::Error) -> Self {
        let kind = match err {
            diesel::result::Error::NotFound => DatabaseErrorKind::NotFound,
            other => DatabaseErrorKind::Query(other.to_string()),
        };
        DatabaseError::new(kind)
    }
}

#[cfg(feature = "database")]
impl From<diesel::ConnectionError> for DatabaseError {
    #[track_caller]
    fn from(err: diesel::ConnectionError) -> Self {
        DatabaseError::new(DatabaseErrorKind::Connection(err.to_string()))
    }
}

#[cfg(feature = "database")]
impl From<diesel::r2d2::PoolError> for DatabaseError {
    #[track_caller]
    fn from(err: diesel::r2d2::PoolError) -> Self {
        DatabaseError::new(DatabaseErrorKind::Connection(format!("pool: {}", err)))
    }
}

#[cfg(all(feature = "database", feature = "json"))]
impl From<serde_json::Error> for DatabaseError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::new(DatabaseErrorKind::Serialization(err.to_string()))
    }
}
