//! Topic subscription over a fan-out transport, shard-and-dispatch to a
//! per-topic-group [`crate::worker_pool::WorkerPool`].

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::error::ReplicatorError;
use crate::hash_ring::ConsistentHashRing;
use crate::worker::WorkerCallback;
use crate::worker_pool::WorkerPool;
pub use transport::{InMemoryTransport, Transport};

/// One `event(...)` registration: a worker pool dedicated to the topics it
/// covers, plus the ring that shards pks across that pool.
struct TopicGroup {
    pool: WorkerPool,
    ring: ConsistentHashRing,
}

/// Dispatches frames read from a [`Transport`] into per-topic worker pools.
///
/// Registration (`event`) happens before `run`; the topic -> group mapping
/// is immutable once the receive loop starts — each group's ring is built
/// once at registration and never mutated at runtime.
#[derive(Default)]
pub struct Replicator {
    groups: Vec<TopicGroup>,
    topic_index: HashMap<String, usize>,
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback to handle one or more topics with a dedicated
    /// pool of `workers` queues.
    pub fn event(
        &mut self,
        topics: impl IntoIterator<Item = String>,
        workers: usize,
        multi: bool,
        queue_limit: usize,
        callback: Arc<dyn WorkerCallback>,
    ) -> Result<(), ReplicatorError> {
        let config = WorkerConfig {
            multi,
            queue_limit,
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::start(workers.max(1), config, callback);
        let ring = ConsistentHashRing::with_shards(workers.max(1), ConsistentHashRing::DEFAULT_REPLICAS)
            .map_err(|e| ReplicatorError::Transport(e.to_string()))?;

        let idx = self.groups.len();
        self.groups.push(TopicGroup { pool, ring });
        for topic in topics {
            self.topic_index.insert(topic, idx);
        }
        Ok(())
    }

    /// Receive loop: read a frame, parse `(topic, [pks])`, shard each pk
    /// into its topic group's pool. Malformed frames and unrecognized
    /// topics are logged and skipped, not fatal.
    pub async fn run(&mut self, mut transport: impl Transport) -> Result<(), ReplicatorError> {
        loop {
            let frame = match transport.recv_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("transport closed, terminating replicator");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "transport error, terminating pools");
                    break;
                }
            };

            let mut tokens = frame.split_whitespace();
            let Some(topic) = tokens.next() else {
                tracing::warn!(frame, "malformed frame, skipping");
                continue;
            };
            let pks: Vec<&str> = tokens.collect();
            if pks.is_empty() {
                tracing::warn!(frame, "malformed frame, skipping");
                continue;
            }

            let Some(&idx) = self.topic_index.get(topic) else {
                tracing::warn!(topic, "no registration for topic, dropping frame");
                continue;
            };
            let group = &self.groups[idx];
            for pk in pks {
                match group.ring.lookup(pk) {
                    Ok(shard) => {
                        if let Err(e) = group.pool.dispatch(shard, pk.to_string()) {
                            tracing::error!(topic, pk, error = %e, "failed to dispatch pk");
                        }
                    }
                    Err(e) => tracing::error!(topic, pk, error = %e, "hash ring lookup failed"),
                }
            }
        }

        self.terminate().await;
        Ok(())
    }

    async fn terminate(&mut self) {
        for group in self.groups.drain(..) {
            group.pool.terminate().await;
        }
    }
}

/// Accumulates pks that an external-queue callback failed to enqueue, and
/// only advances past a batch once the callback reports success for all of
/// it. Used instead of [`WorkerPool`] dispatch when the downstream callback
/// hands pks off to an external task system rather than processing them in
/// place.
pub struct ExternalQueueDispatcher<F> {
    pending: HashMap<String, Vec<String>>,
    enqueue: F,
}

impl<F> ExternalQueueDispatcher<F>
where
    F: Fn(&str, &[String]) -> Result<bool, ReplicatorError>,
{
    pub fn new(enqueue: F) -> Self {
        Self {
            pending: HashMap::new(),
            enqueue,
        }
    }

    /// Merge `pks` into `topic`'s pending set, then retry the whole set.
    /// The pending set is cleared only when the callback returns `Ok(true)`.
    pub fn dispatch(&mut self, topic: &str, pks: &[String]) -> Result<(), ReplicatorError> {
        let entry = self.pending.entry(topic.to_string()).or_default();
        for pk in pks {
            if !entry.contains(pk) {
                entry.push(pk.clone());
            }
        }

        match (self.enqueue)(topic, entry) {
            Ok(true) => {
                self.pending.remove(topic);
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(topic, pending = entry.len(), "external queue still backed up, retrying next frame");
                Ok(())
            }
            Err(e) => {
                tracing::error!(topic, error = %e, "external queue enqueue failed, retrying next frame");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingCallback {
        seen: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl WorkerCallback for RecordingCallback {
        async fn invoke(&self, pks: &[String]) -> Result<Vec<bool>, crate::error::WorkerError> {
            self.seen.lock().unwrap().extend(pks.iter().cloned());
            Ok(vec![true; pks.len()])
        }
    }

    #[tokio::test]
    async fn shards_frames_to_workers_and_every_pk_is_handled_exactly_once() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut replicator = Replicator::new();
        replicator
            .event(
                vec!["test_write".to_string()],
                3,
                true,
                10_000,
                Arc::new(RecordingCallback { seen: Arc::clone(&seen) }),
            )
            .unwrap();

        let frame = std::iter::once("test_write".to_string())
            .chain((0..50).map(|i| i.to_string()))
            .collect::<Vec<_>>()
            .join(" ");
        let transport = InMemoryTransport::new(vec![frame]);

        replicator.run(transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expected: HashSet<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_without_terminating_the_loop() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut replicator = Replicator::new();
        replicator
            .event(
                vec!["test_write".to_string()],
                1,
                true,
                10_000,
                Arc::new(RecordingCallback { seen: Arc::clone(&seen) }),
            )
            .unwrap();

        let transport = InMemoryTransport::new(vec![
            "test_write".to_string(),
            "unknown_topic 1 2".to_string(),
            "test_write 7".to_string(),
        ]);
        replicator.run(transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*seen.lock().unwrap(), HashSet::from(["7".to_string()]));
    }

    #[test]
    fn external_queue_dispatcher_keeps_pending_until_success() {
        let attempt = AtomicUsize::new(0);
        let mut dispatcher = ExternalQueueDispatcher::new(|_topic, pks| {
            let n = attempt.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(false)
            } else {
                assert_eq!(pks.len(), 2);
                Ok(true)
            }
        });

        dispatcher.dispatch("test_write", &["1".to_string()]).unwrap();
        assert_eq!(dispatcher.pending.get("test_write").unwrap().len(), 1);

        dispatcher.dispatch("test_write", &["2".to_string()]).unwrap();
        assert!(!dispatcher.pending.contains_key("test_write"));
    }
}
