//! Index of pending temporary mutes and bans.
//!
//! Entries live in the KV as one hash per guild (`modsystem:temp:{guild}`,
//! member id to JSON) plus a set of guilds with pending entries
//! (`modsystem:temp_guilds`), so every process sees the same schedule.

use crate::{Case, CaseAuthor, Level, ModlogMessageRef};
use meridian_error::{MeridianResult, ModerationError, ModerationErrorKind};
use meridian_kv::SharedKv;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GUILDS_KEY: &str = "modsystem:temp_guilds";

fn guild_key(guild_id: u64) -> String {
    format!("modsystem:temp:{}", guild_id)
}

/// A mute or ban waiting for its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempAction {
    /// Guild id
    pub guild_id: u64,
    /// Member id
    pub user_id: u64,
    /// [`Level::Mute`] or [`Level::Ban`]
    pub level: Level,
    /// Unix timestamp the action was taken
    pub taken_at: i64,
    /// Length in seconds
    pub duration: u64,
    /// Case reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Who issued it
    pub author: CaseAuthor,
    /// Roles to restore on unmute
    #[serde(default)]
    pub roles: Vec<u64>,
    /// Modlog embed of the case
    #[serde(default)]
    pub modlog_message: Option<ModlogMessageRef>,
}

impl TempAction {
    /// Entry for a case, `None` unless it is a timed mute or ban.
    pub fn from_case(guild_id: u64, user_id: u64, case: &Case) -> Option<Self> {
        let duration = case.duration.filter(|_| case.level.is_reversible())?;
        Some(Self {
            guild_id,
            user_id,
            level: case.level,
            taken_at: case.time,
            duration,
            reason: case.reason.clone(),
            author: case.author.clone(),
            roles: case.roles.clone(),
            modlog_message: case.modlog_message,
        })
    }

    /// Unix timestamp at which the action ends.
    pub fn ends_at(&self) -> i64 {
        self.taken_at + self.duration as i64
    }

    /// Whether the action has run its course at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.ends_at() < now
    }

    /// Length of the action.
    pub fn length(&self) -> Duration {
        Duration::from_secs(self.duration)
    }
}

/// A stored entry that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptEntry {
    /// Guild id
    pub guild_id: u64,
    /// Raw hash field
    pub field: String,
    /// Raw value
    pub raw: String,
}

/// KV-backed schedule of temporary actions.
#[derive(Clone)]
pub struct TempActionIndex {
    kv: SharedKv,
}

impl std::fmt::Debug for TempActionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempActionIndex").finish_non_exhaustive()
    }
}

impl TempActionIndex {
    /// Create an index over the KV.
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// Schedule an action, replacing any pending one for the same member.
    #[tracing::instrument(skip(self, action), fields(guild_id = action.guild_id, user_id = action.user_id))]
    pub async fn add(&self, action: &TempAction) -> MeridianResult<()> {
        let raw = serde_json::to_string(action)
            .map_err(|e| ModerationError::new(ModerationErrorKind::Store(e.to_string())))?;
        self.kv
            .hset(&guild_key(action.guild_id), &action.user_id.to_string(), &raw)
            .await?;
        self.kv
            .sadd(GUILDS_KEY, &action.guild_id.to_string())
            .await?;
        tracing::debug!(ends_at = action.ends_at(), "Scheduled temporary action");
        Ok(())
    }

    /// The pending action of a member.
    pub async fn get(&self, guild_id: u64, user_id: u64) -> MeridianResult<Option<TempAction>> {
        let raw = self
            .kv
            .hget(&guild_key(guild_id), &user_id.to_string())
            .await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    /// Drop a member's pending action. Returns whether one existed.
    pub async fn remove(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool> {
        self.remove_field(guild_id, &user_id.to_string()).await
    }

    /// Drop a raw hash field, including undecodable ones.
    pub async fn remove_field(&self, guild_id: u64, field: &str) -> MeridianResult<bool> {
        let key = guild_key(guild_id);
        let removed = self.kv.hdel(&key, field).await?;
        if self.kv.hgetall(&key).await?.is_empty() {
            self.kv.srem(GUILDS_KEY, &guild_id.to_string()).await?;
        }
        Ok(removed)
    }

    /// Guilds with pending actions.
    pub async fn guilds(&self) -> MeridianResult<Vec<u64>> {
        let mut guilds: Vec<u64> = self
            .kv
            .smembers(GUILDS_KEY)
            .await?
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        guilds.sort_unstable();
        Ok(guilds)
    }

    /// Pending actions of a guild, plus the entries that failed to decode.
    pub async fn list(&self, guild_id: u64) -> MeridianResult<(Vec<TempAction>, Vec<CorruptEntry>)> {
        let mut actions = Vec::new();
        let mut corrupt = Vec::new();
        for (field, raw) in self.kv.hgetall(&guild_key(guild_id)).await? {
            match serde_json::from_str::<TempAction>(&raw) {
                Ok(action) => actions.push(action),
                Err(_) => corrupt.push(CorruptEntry {
                    guild_id,
                    field,
                    raw,
                }),
            }
        }
        actions.sort_by_key(|a| (a.ends_at(), a.user_id));
        Ok((actions, corrupt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_kv::{KvStore, MemoryKv};
    use std::sync::Arc;

    fn mute(user_id: u64, taken_at: i64, duration: u64) -> TempAction {
        TempAction {
            guild_id: 1,
            user_id,
            level: Level::Mute,
            taken_at,
            duration,
            reason: None,
            author: CaseAuthor::Id(7),
            roles: vec![3],
            modlog_message: None,
        }
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let kv = Arc::new(MemoryKv::new());
        let index = TempActionIndex::new(kv.clone());
        index.add(&mute(10, 100, 60)).await.unwrap();
        index.add(&mute(11, 100, 5)).await.unwrap();
        assert_eq!(index.guilds().await.unwrap(), vec![1]);

        let (actions, corrupt) = index.list(1).await.unwrap();
        assert!(corrupt.is_empty());
        assert_eq!(actions[0].user_id, 11);

        assert!(index.remove(1, 10).await.unwrap());
        assert!(index.remove(1, 11).await.unwrap());
        assert!(index.guilds().await.unwrap().is_empty());
        assert!(!kv.exists("modsystem:temp:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_entries_reported() {
        let kv = Arc::new(MemoryKv::new());
        let index = TempActionIndex::new(kv.clone());
        kv.hset("modsystem:temp:1", "10", "not json").await.unwrap();
        kv.sadd("modsystem:temp_guilds", "1").await.unwrap();
        let (actions, corrupt) = index.list(1).await.unwrap();
        assert!(actions.is_empty());
        assert_eq!(corrupt[0].field, "10");
    }

    #[test]
    fn test_only_timed_reversible_cases_schedule() {
        let case = Case {
            level: Level::Kick,
            author: CaseAuthor::Id(1),
            reason: None,
            time: 0,
            duration: Some(60),
            roles: Vec::new(),
            modlog_message: None,
        };
        assert!(TempAction::from_case(1, 2, &case).is_none());
        let ban = Case {
            level: Level::Ban,
            ..case
        };
        let action = TempAction::from_case(1, 2, &ban).unwrap();
        assert!(!action.is_expired(60));
        assert!(action.is_expired(61));
    }
}
