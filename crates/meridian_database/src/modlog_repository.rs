//! Repository for per-member moderation case logs.

use crate::models::{ModlogRow, NewModlogRow, from_db_id, to_db_id};
use crate::DatabaseResult;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

/// Case log persistence.
///
/// A log is an opaque JSON array owned by the moderation core; the repository
/// stores it whole, keyed by `(guild_id, user_id)`.
pub trait ModlogRepository {
    /// Load one member's case log. Empty when the member has no cases.
    fn load_cases(&mut self, guild_id: u64, user_id: u64) -> DatabaseResult<serde_json::Value>;

    /// Replace one member's case log.
    fn save_cases(
        &mut self,
        guild_id: u64,
        user_id: u64,
        cases: &serde_json::Value,
    ) -> DatabaseResult<()>;

    /// Delete one member's case log. Returns whether a log existed.
    fn delete_cases(&mut self, guild_id: u64, user_id: u64) -> DatabaseResult<bool>;

    /// Every `(user_id, cases)` log of a guild.
    fn guild_cases(&mut self, guild_id: u64) -> DatabaseResult<Vec<(u64, serde_json::Value)>>;
}

/// PostgreSQL implementation of ModlogRepository.
pub struct PostgresModlogRepository<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PostgresModlogRepository<'a> {
    /// Create a repository over a connection.
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }
}

impl ModlogRepository for PostgresModlogRepository<'_> {
    fn load_cases(&mut self, guild: u64, user: u64) -> DatabaseResult<serde_json::Value> {
        use crate::schema::modlogs::dsl;

        let row: Option<ModlogRow> = dsl::modlogs
            .filter(dsl::guild_id.eq(to_db_id(guild)))
            .filter(dsl::user_id.eq(to_db_id(user)))
            .select(ModlogRow::as_select())
            .first(self.conn)
            .optional()?;
        Ok(row
            .map(|r| r.cases)
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())))
    }

    fn save_cases(
        &mut self,
        guild: u64,
        user: u64,
        cases: &serde_json::Value,
    ) -> DatabaseResult<()> {
        use crate::schema::modlogs::dsl;

        let row = NewModlogRow {
            guild_id: to_db_id(guild),
            user_id: to_db_id(user),
            cases: cases.clone(),
            updated_at: Utc::now(),
        };
        diesel::insert_into(dsl::modlogs)
            .values(&row)
            .on_conflict((dsl::guild_id, dsl::user_id))
            .do_update()
            .set((
                dsl::cases.eq(excluded(dsl::cases)),
                dsl::updated_at.eq(excluded(dsl::updated_at)),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn delete_cases(&mut self, guild: u64, user: u64) -> DatabaseResult<bool> {
        use crate::schema::modlogs::dsl;

        let deleted = diesel::delete(
            dsl::modlogs
                .filter(dsl::guild_id.eq(to_db_id(guild)))
                .filter(dsl::user_id.eq(to_db_id(user))),
        )
        .execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn guild_cases(&mut self, guild: u64) -> DatabaseResult<Vec<(u64, serde_json::Value)>> {
        use crate::schema::modlogs::dsl;

        let rows: Vec<ModlogRow> = dsl::modlogs
            .filter(dsl::guild_id.eq(to_db_id(guild)))
            .select(ModlogRow::as_select())
            .load(self.conn)?;
        Ok(rows
            .into_iter()
            .map(|r| (from_db_id(r.user_id), r.cases))
            .collect())
    }
}
