//! Diesel models.

use crate::schema::{api_requests, guild_messages, modlogs};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use meridian_quota::AuditRecord;
use serde::Serialize;
use uuid::Uuid;

/// Discord snowflakes fit in 63 bits; Postgres has no unsigned BIGINT.
pub fn to_db_id(id: u64) -> i64 {
    id as i64
}

/// Inverse of [`to_db_id`].
pub fn from_db_id(id: i64) -> u64 {
    id as u64
}

/// Database row for the modlogs table: one member's case log in one guild.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = modlogs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ModlogRow {
    pub guild_id: i64,
    pub user_id: i64,
    pub cases: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Insertable / upsert form of a case log.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = modlogs)]
pub struct NewModlogRow {
    pub guild_id: i64,
    pub user_id: i64,
    pub cases: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Database row for guild_messages.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = guild_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GuildMessageRow {
    pub message_id: i64,
    pub guild_id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub guild_name: String,
    pub user_avatar: Option<String>,
    pub channel_name: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Database row for api_requests.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = api_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApiRequestRow {
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub route_name: String,
    pub processing_time: f64,
    pub username: Option<String>,
    pub user_id: Option<i64>,
    pub args: serde_json::Value,
    pub path_args: serde_json::Value,
    pub body: Option<serde_json::Value>,
    pub failed: bool,
    pub error: Option<String>,
    pub ip: Option<String>,
}

impl From<&AuditRecord> for ApiRequestRow {
    fn from(record: &AuditRecord) -> Self {
        Self {
            request_id: record.request_id,
            created_at: record.created_at,
            route_name: record.route_name.clone(),
            processing_time: record.processing_time,
            username: record.username.clone(),
            user_id: record.user_id.map(to_db_id),
            args: record.args.clone(),
            path_args: record.path_args.clone(),
            body: record.body.clone(),
            failed: record.failed,
            error: record.error.clone(),
            ip: record.ip.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_quota::RequestAudit;

    #[test]
    fn test_audit_record_converts() {
        let record = RequestAudit::start(
            "instagram_profile",
            Some("melanie".into()),
            serde_json::json!({"force": false}),
            serde_json::json!({"user": "nasa"}),
            Some("10.0.0.1".into()),
        )
        .with_user_id(Some(1_234_567_890_123_456_789))
        .finish(None);

        let row = ApiRequestRow::from(&record);
        assert_eq!(row.request_id, record.request_id);
        assert_eq!(row.route_name, "instagram_profile");
        assert_eq!(row.user_id.map(from_db_id), Some(1_234_567_890_123_456_789));
        assert_eq!(row.path_args["user"], "nasa");
        assert!(!row.failed);
    }

    #[test]
    fn test_snowflake_roundtrip() {
        let id = 1_098_765_432_109_876_543u64;
        assert_eq!(from_db_id(to_db_id(id)), id);
    }
}
