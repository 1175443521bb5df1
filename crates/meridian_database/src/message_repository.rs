//! Repository for the guild message cache.

use crate::models::{GuildMessageRow, to_db_id};
use crate::DatabaseResult;
use diesel::pg::PgConnection;
use diesel::prelude::*;

/// Cached Discord messages, looked up by message id.
pub trait GuildMessageRepository {
    /// Find a message.
    fn find_message(&mut self, message_id: u64) -> DatabaseResult<Option<GuildMessageRow>>;

    /// Record a message, ignoring duplicates.
    fn insert_message(&mut self, row: &GuildMessageRow) -> DatabaseResult<()>;
}

/// PostgreSQL implementation of GuildMessageRepository.
pub struct PostgresGuildMessageRepository<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PostgresGuildMessageRepository<'a> {
    /// Create a repository over a connection.
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }
}

impl GuildMessageRepository for PostgresGuildMessageRepository<'_> {
    fn find_message(&mut self, id: u64) -> DatabaseResult<Option<GuildMessageRow>> {
        use crate::schema::guild_messages::dsl;

        Ok(dsl::guild_messages
            .filter(dsl::message_id.eq(to_db_id(id)))
            .select(GuildMessageRow::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn insert_message(&mut self, row: &GuildMessageRow) -> DatabaseResult<()> {
        use crate::schema::guild_messages::dsl;

        diesel::insert_into(dsl::guild_messages)
            .values(row)
            .on_conflict_do_nothing()
            .execute(self.conn)?;
        Ok(())
    }
}
