//! PostgreSQL persistence for Meridian.
//!
//! Three tables back the service:
//!
//! - `modlogs`: one JSON case log per `(guild_id, user_id)`
//! - `guild_messages`: message cache served by the Discord message lookup route
//! - `api_requests`: audit rows for slow API requests
//!
//! Repositories follow a sync trait over `&mut PgConnection`; [`Database`]
//! wraps them for async callers by running each call on the blocking pool
//! with a pooled connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_database::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("postgres://localhost/meridian", 8).await?;
//! let cases = db.load_cases(1, 2).await?;
//! # Ok(())
//! # }
//! ```

mod audit_repository;
mod connection;
mod database;
mod message_repository;
mod models;
mod modlog_repository;

pub mod schema;

pub use audit_repository::{ApiRequestRepository, PostgresApiRequestRepository};
pub use connection::{
    DbConnection, DbPool, MIGRATIONS, create_pool, establish_connection, run_migrations,
};
pub use database::{Database, PgAuditSink};
pub use message_repository::{GuildMessageRepository, PostgresGuildMessageRepository};
pub use models::{
    ApiRequestRow, GuildMessageRow, ModlogRow, NewModlogRow, from_db_id, to_db_id,
};
pub use modlog_repository::{ModlogRepository, PostgresModlogRepository};

use meridian_error::DatabaseError;

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
