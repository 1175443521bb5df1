//! Persistence of per-member case logs.

use crate::Case;
use async_trait::async_trait;
use meridian_error::MeridianResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Storage of case logs, one log per (guild, member).
///
/// Logs are read and written whole. Callers serialise read-modify-write
/// cycles on the same log.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// A member's log, empty when none exists.
    async fn load(&self, guild_id: u64, user_id: u64) -> MeridianResult<Vec<Case>>;

    /// Replace a member's log.
    async fn save(&self, guild_id: u64, user_id: u64, cases: &[Case]) -> MeridianResult<()>;

    /// Drop a member's log. Returns whether one existed.
    async fn remove(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool>;

    /// Every non-empty log of a guild.
    async fn guild(&self, guild_id: u64) -> MeridianResult<Vec<(u64, Vec<Case>)>>;
}

/// Shared handle to a case store.
pub type SharedCaseStore = Arc<dyn CaseStore>;

/// In-process case store.
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    logs: RwLock<HashMap<(u64, u64), Vec<Case>>>,
}

impl MemoryCaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn load(&self, guild_id: u64, user_id: u64) -> MeridianResult<Vec<Case>> {
        Ok(self
            .logs
            .read()
            .get(&(guild_id, user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, guild_id: u64, user_id: u64, cases: &[Case]) -> MeridianResult<()> {
        let mut logs = self.logs.write();
        if cases.is_empty() {
            logs.remove(&(guild_id, user_id));
        } else {
            logs.insert((guild_id, user_id), cases.to_vec());
        }
        Ok(())
    }

    async fn remove(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool> {
        Ok(self.logs.write().remove(&(guild_id, user_id)).is_some())
    }

    async fn guild(&self, guild_id: u64) -> MeridianResult<Vec<(u64, Vec<Case>)>> {
        let mut logs: Vec<_> = self
            .logs
            .read()
            .iter()
            .filter(|((guild, _), _)| *guild == guild_id)
            .map(|((_, user), cases)| (*user, cases.clone()))
            .collect();
        logs.sort_by_key(|(user, _)| *user);
        Ok(logs)
    }
}

#[cfg(feature = "database")]
pub use pg::PgCaseStore;

#[cfg(feature = "database")]
mod pg {
    use super::CaseStore;
    use crate::Case;
    use async_trait::async_trait;
    use meridian_database::Database;
    use meridian_error::{MeridianResult, ModerationError, ModerationErrorKind};

    /// Case store over the `modlogs` table.
    #[derive(Debug, Clone)]
    pub struct PgCaseStore {
        db: Database,
    }

    impl PgCaseStore {
        /// Wrap a database handle.
        pub fn new(db: Database) -> Self {
            Self { db }
        }
    }

    fn decode(value: serde_json::Value) -> MeridianResult<Vec<Case>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value).map_err(|e| {
            ModerationError::new(ModerationErrorKind::Store(format!("undecodable case log: {}", e)))
                .into()
        })
    }

    #[async_trait]
    impl CaseStore for PgCaseStore {
        async fn load(&self, guild_id: u64, user_id: u64) -> MeridianResult<Vec<Case>> {
            decode(self.db.load_cases(guild_id, user_id).await?)
        }

        async fn save(&self, guild_id: u64, user_id: u64, cases: &[Case]) -> MeridianResult<()> {
            if cases.is_empty() {
                self.db.delete_cases(guild_id, user_id).await?;
                return Ok(());
            }
            let value = serde_json::to_value(cases).map_err(|e| {
                ModerationError::new(ModerationErrorKind::Store(e.to_string()))
            })?;
            self.db.save_cases(guild_id, user_id, value).await?;
            Ok(())
        }

        async fn remove(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool> {
            Ok(self.db.delete_cases(guild_id, user_id).await?)
        }

        async fn guild(&self, guild_id: u64) -> MeridianResult<Vec<(u64, Vec<Case>)>> {
            let mut logs = Vec::new();
            for (user_id, value) in self.db.guild_cases(guild_id).await? {
                let cases = decode(value)?;
                if !cases.is_empty() {
                    logs.push((user_id, cases));
                }
            }
            Ok(logs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaseAuthor, Level};

    fn case(time: i64) -> Case {
        Case {
            level: Level::Warn,
            author: CaseAuthor::Id(9),
            reason: None,
            time,
            duration: None,
            roles: Vec::new(),
            modlog_message: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_scopes_by_guild() {
        let store = MemoryCaseStore::new();
        store.save(1, 10, &[case(1)]).await.unwrap();
        store.save(1, 11, &[case(2), case(3)]).await.unwrap();
        store.save(2, 10, &[case(4)]).await.unwrap();

        let guild = store.guild(1).await.unwrap();
        assert_eq!(guild.len(), 2);
        assert_eq!(guild[1].1.len(), 2);
        assert!(store.remove(2, 10).await.unwrap());
        assert!(!store.remove(2, 10).await.unwrap());
        assert!(store.load(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saving_empty_log_removes_it() {
        let store = MemoryCaseStore::new();
        store.save(1, 10, &[case(1)]).await.unwrap();
        store.save(1, 10, &[]).await.unwrap();
        assert!(store.guild(1).await.unwrap().is_empty());
    }
}
