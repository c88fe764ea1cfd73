//! Supervises one [`crate::worker::Worker`] per shard: starts them, watches
//! for liveness, and respawns a dead worker against its own still-live
//! queue.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::worker::{Worker, WorkerCallback, WorkerQueue};

struct Shard {
    queue: WorkerQueue,
    handle: JoinHandle<()>,
}

/// Owns one [`WorkerQueue`] per shard and the supervisor task that restarts
/// a worker if its task exits unexpectedly.
pub struct WorkerPool {
    config: WorkerConfig,
    callback: Arc<dyn WorkerCallback>,
    shards: Arc<Mutex<Vec<Shard>>>,
    shutdown: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `shard_count` workers, each running the same `callback`.
    pub fn start(shard_count: usize, config: WorkerConfig, callback: Arc<dyn WorkerCallback>) -> Self {
        let shutdown = CancellationToken::new();
        let mut shards = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            shards.push(Self::spawn_shard(shard, &config, &callback, &shutdown));
        }

        let mut pool = Self {
            config,
            callback,
            shards: Arc::new(Mutex::new(shards)),
            shutdown,
            supervisor: None,
        };
        pool.spawn_supervisor();
        pool
    }

    fn spawn_shard(
        shard: usize,
        config: &WorkerConfig,
        callback: &Arc<dyn WorkerCallback>,
        shutdown: &CancellationToken,
    ) -> Shard {
        let (tx, rx) = WorkerQueue::channel();
        let worker = Worker::new(shard, rx, tx.clone(), config.clone(), Arc::clone(callback));
        let handle = tokio::spawn(worker.run(shutdown.clone()));
        Shard { queue: tx, handle }
    }

    /// Enqueue `pk` onto `shard`'s queue.
    pub fn dispatch(&self, shard: usize, pk: String) -> Result<(), crate::error::WorkerError> {
        self.shards.lock()[shard].queue.enqueue(pk)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.lock().len()
    }

    /// Heartbeat loop, every `waiting_time`: probe each shard's task for an
    /// unexpected exit and respawn it against a fresh queue, then log the
    /// aggregate depth across all shards. A worker that dies is restarted
    /// under a new shard entry, so a still-buffered pk in a *different*
    /// shard's queue is untouched; only the dead shard's own queue is lost,
    /// matching the original sentinel loop's `is_alive()`-then-recreate
    /// check.
    fn spawn_supervisor(&mut self) {
        let waiting_time = self.config.waiting_time;
        let shutdown = self.shutdown.clone();
        let config = self.config.clone();
        let callback = Arc::clone(&self.callback);
        let shards = Arc::clone(&self.shards);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(waiting_time) => {}
                }

                let mut guard = shards.lock();
                for shard in 0..guard.len() {
                    if guard[shard].handle.is_finished() {
                        tracing::error!(shard, "worker task exited unexpectedly, respawning");
                        guard[shard] = Self::spawn_shard(shard, &config, &callback, &shutdown);
                    }
                }
                let depth: usize = guard.iter().map(|s| s.queue.depth()).sum();
                drop(guard);
                tracing::debug!(depth, "worker pool heartbeat");
            }
        });
        self.supervisor = Some(handle);
    }

    /// The aggregate queue depth across all shards.
    pub fn total_depth(&self) -> usize {
        self.shards.lock().iter().map(|s| s.queue.depth()).sum()
    }

    /// Signal every worker and the supervisor to stop, then wait for them.
    pub async fn terminate(mut self) {
        self.shutdown.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
        let shards: Vec<Shard> = self.shards.lock().drain(..).collect();
        for shard in shards {
            let _ = shard.handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingCallback(Arc<AtomicUsize>);

    #[async_trait]
    impl WorkerCallback for CountingCallback {
        async fn invoke(&self, pks: &[String]) -> Result<Vec<bool>, crate::error::WorkerError> {
            self.0.fetch_add(pks.len(), Ordering::SeqCst);
            Ok(vec![true; pks.len()])
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_the_named_shard_and_drains() {
        let processed = Arc::new(AtomicUsize::new(0));
        let config = WorkerConfig { multi: true, ..WorkerConfig::default() };
        let pool = WorkerPool::start(4, config, Arc::new(CountingCallback(Arc::clone(&processed))));

        for i in 0..10 {
            pool.dispatch(i % 4, i.to_string()).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 10);
        pool.terminate().await;
    }
}
