//! Durable two-phase log for ORM transactions.

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::event::EventSet;

/// Current phase of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Commit,
}

/// How namespace-derived keys are computed. A fixed string, or a function
/// from a unix timestamp to a string for time-bucketed namespaces (e.g.
/// `"meepo:pc:20240115"`).
#[derive(Clone)]
pub enum Namespace {
    Fixed(String),
    TimeBucketed(std::sync::Arc<dyn Fn(i64) -> String + Send + Sync>),
}

impl Namespace {
    pub fn resolve(&self, now: i64) -> String {
        match self {
            Namespace::Fixed(s) => s.clone(),
            Namespace::TimeBucketed(f) => f(now),
        }
    }
}

/// Whether store transport errors propagate (`Strict`) or are caught and
/// reported as `Ok(false)` (`Lenient`) — the application chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    Strict,
    Lenient,
}

/// Durable two-phase record of pending ORM transactions, used to recover
/// events lost between a DB commit and downstream delivery.
#[async_trait]
pub trait PrepareCommitLog: Send + Sync {
    /// Atomically add `tid` to the in-prepare set and store its serialized
    /// event set.
    async fn prepare(&self, tid: &str, event_set: &EventSet) -> Result<bool, StoreError>;

    /// Atomically remove `tid` from the in-prepare set and apply a short TTL
    /// to its event-set key so it lingers for diagnostics before GC.
    async fn commit(&self, tid: &str) -> Result<bool, StoreError>;

    /// Semantically identical to `commit` — the caller is expected not to
    /// publish events on rollback.
    async fn rollback(&self, tid: &str) -> Result<bool, StoreError>;

    /// Membership test in the in-prepare set.
    async fn phase(&self, tid: &str) -> Result<Phase, StoreError>;

    /// Fetch and deserialize the stored event set for `tid`.
    async fn session_info(&self, tid: &str) -> Result<EventSet, StoreError>;

    /// Enumerate currently pending transactions (for crash recovery).
    async fn prepare_info(&self) -> Result<Vec<String>, StoreError>;
}

/// Redis-backed [`PrepareCommitLog`].
///
/// Key layout:
/// `"{namespace}:session_prepare"` -> set of `tid`;
/// `"{namespace}:session_prepare:{tid}"` -> serialized event set.
pub struct RedisPrepareCommitLog {
    conn: redis::aio::ConnectionManager,
    namespace: Namespace,
    commit_ttl: std::time::Duration,
    error_mode: ErrorMode,
}

impl RedisPrepareCommitLog {
    pub async fn connect(
        config: &StoreConfig,
        namespace: Namespace,
        error_mode: ErrorMode,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            namespace,
            commit_ttl: config.prepare_commit_ttl,
            error_mode,
        })
    }

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn pending_key(&self) -> String {
        format!("{}:session_prepare", self.namespace.resolve(self.now()))
    }

    fn event_set_key(&self, tid: &str) -> String {
        format!(
            "{}:session_prepare:{tid}",
            self.namespace.resolve(self.now())
        )
    }

    /// Run `op`, applying the configured [`ErrorMode`]: strict mode
    /// propagates the error, lenient mode logs it and reports `Ok(false)`.
    async fn guarded(&self, op: Result<(), StoreError>) -> Result<bool, StoreError> {
        match op {
            Ok(()) => Ok(true),
            Err(e) => match self.error_mode {
                ErrorMode::Strict => Err(e),
                ErrorMode::Lenient => {
                    tracing::warn!(error = %e, "prepare-commit log transport error (lenient mode)");
                    Ok(false)
                }
            },
        }
    }
}

#[async_trait]
impl PrepareCommitLog for RedisPrepareCommitLog {
    async fn prepare(&self, tid: &str, event_set: &EventSet) -> Result<bool, StoreError> {
        let pending_key = self.pending_key();
        let event_key = self.event_set_key(tid);
        let serialized = serde_json::to_string(event_set)?;
        let mut conn = self.conn.clone();

        let op: Result<(), StoreError> = async {
            let _: () = redis::pipe()
                .atomic()
                .sadd(&pending_key, tid)
                .set(&event_key, serialized)
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        self.guarded(op).await
    }

    async fn commit(&self, tid: &str) -> Result<bool, StoreError> {
        let pending_key = self.pending_key();
        let event_key = self.event_set_key(tid);
        let mut conn = self.conn.clone();

        let op: Result<(), StoreError> = async {
            let _: () = redis::pipe()
                .atomic()
                .srem(&pending_key, tid)
                .expire(&event_key, self.commit_ttl.as_secs() as i64)
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        self.guarded(op).await
    }

    async fn rollback(&self, tid: &str) -> Result<bool, StoreError> {
        // Semantically identical to commit.
        self.commit(tid).await
    }

    async fn phase(&self, tid: &str) -> Result<Phase, StoreError> {
        let pending_key = self.pending_key();
        let mut conn = self.conn.clone();
        let is_pending: bool = conn.sismember(&pending_key, tid).await?;
        Ok(if is_pending { Phase::Prepare } else { Phase::Commit })
    }

    async fn session_info(&self, tid: &str) -> Result<EventSet, StoreError> {
        let event_key = self.event_set_key(tid);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&event_key).await?;
        let raw = raw.ok_or_else(|| StoreError::NoEventSet(tid.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn prepare_info(&self) -> Result<Vec<String>, StoreError> {
        let pending_key = self.pending_key();
        let mut conn = self.conn.clone();
        let tids: Vec<String> = conn.smembers(&pending_key).await?;
        Ok(tids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PrimaryKey, Value};
    use std::collections::HashMap;

    /// In-memory stand-in for round-trip/property tests that don't need a
    /// live Redis instance.
    #[derive(Default)]
    struct InMemoryPrepareCommitLog {
        pending: parking_lot::Mutex<std::collections::HashSet<String>>,
        event_sets: parking_lot::Mutex<HashMap<String, EventSet>>,
    }

    #[async_trait]
    impl PrepareCommitLog for InMemoryPrepareCommitLog {
        async fn prepare(&self, tid: &str, event_set: &EventSet) -> Result<bool, StoreError> {
            self.pending.lock().insert(tid.to_string());
            self.event_sets.lock().insert(tid.to_string(), event_set.clone());
            Ok(true)
        }

        async fn commit(&self, tid: &str) -> Result<bool, StoreError> {
            self.pending.lock().remove(tid);
            Ok(true)
        }

        async fn rollback(&self, tid: &str) -> Result<bool, StoreError> {
            self.commit(tid).await
        }

        async fn phase(&self, tid: &str) -> Result<Phase, StoreError> {
            Ok(if self.pending.lock().contains(tid) {
                Phase::Prepare
            } else {
                Phase::Commit
            })
        }

        async fn session_info(&self, tid: &str) -> Result<EventSet, StoreError> {
            self.event_sets
                .lock()
                .get(tid)
                .cloned()
                .ok_or_else(|| StoreError::NoEventSet(tid.to_string()))
        }

        async fn prepare_info(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.pending.lock().iter().cloned().collect())
        }
    }

    #[tokio::test]
    async fn prepare_then_session_info_round_trips() {
        let log = InMemoryPrepareCommitLog::default();
        let mut event_set = EventSet::new();
        event_set.insert("test_write".into(), vec![PrimaryKey::Single(Value::Int(1))]);

        log.prepare("t1", &event_set).await.unwrap();
        assert_eq!(log.session_info("t1").await.unwrap(), event_set);
    }

    #[tokio::test]
    async fn commit_clears_prepare_membership() {
        let log = InMemoryPrepareCommitLog::default();
        let event_set = EventSet::new();
        log.prepare("t1", &event_set).await.unwrap();
        assert_eq!(log.phase("t1").await.unwrap(), Phase::Prepare);
        assert!(log.prepare_info().await.unwrap().contains(&"t1".to_string()));

        log.commit("t1").await.unwrap();
        assert_eq!(log.phase("t1").await.unwrap(), Phase::Commit);
        assert!(!log.prepare_info().await.unwrap().contains(&"t1".to_string()));
    }

    #[tokio::test]
    async fn rollback_also_clears_prepare_membership() {
        let log = InMemoryPrepareCommitLog::default();
        let event_set = EventSet::new();
        log.prepare("t1", &event_set).await.unwrap();
        log.rollback("t1").await.unwrap();
        assert_eq!(log.phase("t1").await.unwrap(), Phase::Commit);
    }
}
