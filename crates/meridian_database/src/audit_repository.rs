//! Repository for slow-request audit rows.

use crate::models::ApiRequestRow;
use crate::DatabaseResult;
use diesel::pg::PgConnection;
use diesel::prelude::*;

/// Audit persistence.
pub trait ApiRequestRepository {
    /// Insert one audit row.
    fn insert_request(&mut self, row: &ApiRequestRow) -> DatabaseResult<()>;

    /// Most recent rows, newest first.
    fn recent_requests(&mut self, limit: i64) -> DatabaseResult<Vec<ApiRequestRow>>;
}

/// PostgreSQL implementation of ApiRequestRepository.
pub struct PostgresApiRequestRepository<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PostgresApiRequestRepository<'a> {
    /// Create a repository over a connection.
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }
}

impl ApiRequestRepository for PostgresApiRequestRepository<'_> {
    fn insert_request(&mut self, row: &ApiRequestRow) -> DatabaseResult<()> {
        use crate::schema::api_requests::dsl;

        diesel::insert_into(dsl::api_requests)
            .values(row)
            .on_conflict_do_nothing()
            .execute(self.conn)?;
        Ok(())
    }

    fn recent_requests(&mut self, limit: i64) -> DatabaseResult<Vec<ApiRequestRow>> {
        use crate::schema::api_requests::dsl;

        Ok(dsl::api_requests
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(ApiRequestRow::as_select())
            .load(self.conn)?)
    }
}
