//! Append-only, time-indexed event log.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Compare-and-swap-then-set script: only update the score for `pk` if the
/// new `ts` is strictly newer than what's stored (or `pk` isn't stored yet).
/// Returns 1 if the store was updated, 0 if the call was a no-op. Runs
/// server-side so the check-then-set is atomic against the store.
const ADD_IF_NEWER_SCRIPT: &str = r#"
local key = KEYS[1]
local pk = ARGV[1]
local ts = tonumber(ARGV[2])
local existing = redis.call('ZSCORE', key, pk)
if existing and tonumber(existing) >= ts then
    return 0
end
redis.call('ZADD', key, ts, pk)
return 1
"#;

/// Per-`(event, namespace)` time series of `(pk, ts)`, supporting
/// timestamp-bounded replay.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upsert `(pk, ts)`. If `pk` is already present with a score `>= ts`,
    /// this is a no-op and returns `Ok(false)`; otherwise the score is
    /// updated and this returns `Ok(true)`. `ts` defaults to the current
    /// time (seconds) when omitted.
    async fn add(&self, event: &str, pk: &str, ts: Option<i64>) -> Result<bool, StoreError>;

    /// Return pks whose score lies in `[from, to]` inclusive, ascending.
    async fn replay(
        &self,
        event: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// Drop the index for `event`.
    async fn clear(&self, event: &str) -> Result<(), StoreError>;
}

/// Redis-backed [`EventStore`] using sorted sets scored by `ts`, keyed
/// `"{namespace}:{event}"`.
pub struct RedisEventStore {
    conn: redis::aio::ConnectionManager,
    namespace: String,
    ttl: std::time::Duration,
}

impl RedisEventStore {
    pub async fn connect(config: &StoreConfig, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
            ttl: config.event_ttl,
        })
    }

    fn key(&self, event: &str) -> String {
        format!("{}:{}", self.namespace, event)
    }
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn add(&self, event: &str, pk: &str, ts: Option<i64>) -> Result<bool, StoreError> {
        let ts = ts.unwrap_or_else(now_secs);
        let key = self.key(event);
        let mut conn = self.conn.clone();

        let result: Result<i64, redis::RedisError> = redis::Script::new(ADD_IF_NEWER_SCRIPT)
            .key(&key)
            .arg(pk)
            .arg(ts)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(updated) => {
                if updated == 1 {
                    let _: Result<(), redis::RedisError> =
                        conn.expire(&key, self.ttl.as_secs() as i64).await;
                }
                Ok(updated == 1)
            }
            Err(e) => {
                warn!(event, pk, error = %e, "event store add failed");
                Err(StoreError::Transport(e))
            }
        }
    }

    async fn replay(
        &self,
        event: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let key = self.key(event);
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();

        let raw: Vec<(String, i64)> = conn.zrangebyscore_withscores(&key, from, to).await?;
        Ok(raw)
    }

    async fn clear(&self, event: &str) -> Result<(), StoreError> {
        let key = self.key(event);
        let mut conn = self.conn.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}
