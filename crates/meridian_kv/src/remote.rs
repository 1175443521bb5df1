//! Redis-backed key-value store.

use crate::store::{KvResult, KvStore};
use async_trait::async_trait;
use meridian_error::{KvError, KvErrorKind};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;

const RATE_LIMIT_SCRIPT: &str = r#"
    local v = redis.call("INCRBY", KEYS[1], 1)
    if v == 1 then
      redis.call("PEXPIRE", KEYS[1], ARGV[1])
    end
    return v
"#;

const SCAN_COUNT: usize = 500;

/// Store backed by a Redis-compatible server.
///
/// `ConnectionManager` multiplexes and reconnects on its own; each call clones
/// the handle rather than holding a lock across the request.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv {
    /// Connect to the server at `url` (`redis://host:port/db`).
    #[tracing::instrument(skip(url))]
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| KvError::new(KvErrorKind::Connection(e.to_string())))?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to key-value store");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvResult<bool> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let mut conn = self.conn();
        let ms: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        // -2 missing, -1 persistent
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let mut conn = self.conn();
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> KvResult<i64> {
        let mut conn = self.conn();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    #[tracing::instrument(skip(self))]
    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        out.sort();
        out.dedup();
        tracing::debug!(matched = out.len(), "Scanned keys");
        Ok(out)
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let written: bool = conn.hset_nx(key, field, value).await?;
        Ok(written)
    }

    async fn hdel(&self, key: &str, field: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        let mut conn = self.conn();
        let all: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(all)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        let mut conn = self.conn();
        let value: i64 = conn.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let found: bool = conn.sismember(key, member).await?;
        Ok(found)
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        let mut members: Vec<String> = conn.smembers(key).await?;
        members.sort();
        Ok(members)
    }

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn rate_limit(&self, key: &str, max: u64, window: Duration) -> KvResult<bool> {
        let mut conn = self.conn();
        let count: i64 = redis::Script::new(RATE_LIMIT_SCRIPT)
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;
        Ok(count as u64 <= max)
    }
}
