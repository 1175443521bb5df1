//! Async facade over the connection pool.

use crate::{
    ApiRequestRepository, ApiRequestRow, DatabaseResult, DbConnection, DbPool,
    GuildMessageRepository, GuildMessageRow, ModlogRepository, PostgresApiRequestRepository,
    PostgresGuildMessageRepository, PostgresModlogRepository, create_pool, run_migrations,
};
use async_trait::async_trait;
use meridian_error::{DatabaseError, DatabaseErrorKind, MeridianResult};
use meridian_quota::{AuditRecord, AuditSink};

/// Shared handle to Postgres. Blocking diesel calls run on the blocking pool.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl Database {
    /// Connect, then apply pending migrations.
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str, pool_size: u32) -> DatabaseResult<Self> {
        let url = database_url.to_string();
        let pool = tokio::task::spawn_blocking(move || create_pool(&url, pool_size))
            .await
            .map_err(|e| DatabaseError::new(DatabaseErrorKind::Connection(e.to_string())))??;
        let db = Self { pool };
        db.run(|conn| run_migrations(conn)).await?;
        Ok(db)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run `f` with a pooled connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> DatabaseResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DbConnection) -> DatabaseResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| DatabaseError::new(DatabaseErrorKind::Query(e.to_string())))?
    }

    /// Load one member's case log.
    pub async fn load_cases(&self, guild_id: u64, user_id: u64) -> DatabaseResult<serde_json::Value> {
        self.run(move |conn| PostgresModlogRepository::new(conn).load_cases(guild_id, user_id))
            .await
    }

    /// Replace one member's case log.
    pub async fn save_cases(
        &self,
        guild_id: u64,
        user_id: u64,
        cases: serde_json::Value,
    ) -> DatabaseResult<()> {
        self.run(move |conn| {
            PostgresModlogRepository::new(conn).save_cases(guild_id, user_id, &cases)
        })
        .await
    }

    /// Delete one member's case log.
    pub async fn delete_cases(&self, guild_id: u64, user_id: u64) -> DatabaseResult<bool> {
        self.run(move |conn| PostgresModlogRepository::new(conn).delete_cases(guild_id, user_id))
            .await
    }

    /// Every case log of a guild.
    pub async fn guild_cases(&self, guild_id: u64) -> DatabaseResult<Vec<(u64, serde_json::Value)>> {
        self.run(move |conn| PostgresModlogRepository::new(conn).guild_cases(guild_id))
            .await
    }

    /// Look up a cached message.
    pub async fn find_message(&self, message_id: u64) -> DatabaseResult<Option<GuildMessageRow>> {
        self.run(move |conn| PostgresGuildMessageRepository::new(conn).find_message(message_id))
            .await
    }

    /// Record a message.
    pub async fn insert_message(&self, row: GuildMessageRow) -> DatabaseResult<()> {
        self.run(move |conn| PostgresGuildMessageRepository::new(conn).insert_message(&row))
            .await
    }

    /// Insert an audit row.
    pub async fn insert_request(&self, row: ApiRequestRow) -> DatabaseResult<()> {
        self.run(move |conn| PostgresApiRequestRepository::new(conn).insert_request(&row))
            .await
    }
}

/// Audit sink writing to the `api_requests` table.
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    db: Database,
}

impl PgAuditSink {
    /// Create a sink.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, record: &AuditRecord) -> MeridianResult<()> {
        self.db.insert_request(ApiRequestRow::from(record)).await?;
        tracing::debug!(request_id = %record.request_id, "Persisted audit row");
        Ok(())
    }
}
