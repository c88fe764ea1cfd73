//! Worker state machine: drains its queue, invokes the user callback, and
//! tracks per-pk retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::worker::queue::{RetryCounter, WorkerQueue, WorkerQueueReceiver};

/// User-supplied job: given a batch of pks, return one bool per pk (`true`
/// = processed successfully, `false` = retry). When [`WorkerConfig::multi`]
/// is false the worker invokes this with one-element slices so the shape of
/// the trait stays uniform either way.
#[async_trait]
pub trait WorkerCallback: Send + Sync {
    async fn invoke(&self, pks: &[String]) -> Result<Vec<bool>, WorkerError>;
}

#[async_trait]
impl<F> WorkerCallback for F
where
    F: Fn(&[String]) -> Result<Vec<bool>, WorkerError> + Send + Sync,
{
    async fn invoke(&self, pks: &[String]) -> Result<Vec<bool>, WorkerError> {
        self(pks)
    }
}

/// One shard's consumer loop: pulls from its [`WorkerQueue`], calls the
/// user callback, re-enqueues failed pks immediately, and then sleeps once
/// per batch for a duration proportional to that batch's failure count
/// (capped at `max_retry_interval`).
pub struct Worker {
    pub shard: usize,
    rx: WorkerQueueReceiver,
    tx: WorkerQueue,
    config: WorkerConfig,
    callback: Arc<dyn WorkerCallback>,
    retries: RetryCounter,
}

impl Worker {
    pub fn new(
        shard: usize,
        rx: WorkerQueueReceiver,
        tx: WorkerQueue,
        config: WorkerConfig,
        callback: Arc<dyn WorkerCallback>,
    ) -> Self {
        Self {
            shard,
            rx,
            tx,
            config,
            callback,
            retries: RetryCounter::default(),
        }
    }

    /// Run until `shutdown` is triggered. Each iteration: dedup the queue
    /// if it is above `queue_limit`, drain a batch bounded by
    /// `max_pk_count`, invoke the callback, re-enqueue failures, and sleep
    /// once for the batch proportional to its failure count.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            if self.tx.depth() > self.config.queue_limit {
                tracing::warn!(shard = self.shard, depth = self.tx.depth(), "queue over limit, deduping");
                self.rx.dedup_drain(&self.tx);
            }

            let batch = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(shard = self.shard, "worker shutting down");
                    return;
                }
                batch = self.rx.recv_batch(self.config.max_pk_count) => batch,
            };

            if batch.is_empty() {
                continue;
            }

            self.process_batch(batch).await;
        }
    }

    async fn process_batch(&mut self, batch: Vec<String>) {
        let results = if self.config.multi {
            match self.callback.invoke(&batch).await {
                Ok(results) if results.len() == batch.len() => results,
                Ok(_) => {
                    tracing::error!(shard = self.shard, "callback returned a mismatched result count");
                    vec![false; batch.len()]
                }
                Err(e) => {
                    tracing::error!(shard = self.shard, error = %e, "worker callback failed, cooling down");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    vec![false; batch.len()]
                }
            }
        } else {
            let mut results = Vec::with_capacity(batch.len());
            for pk in &batch {
                match self.callback.invoke(std::slice::from_ref(pk)).await {
                    Ok(r) => results.push(r.first().copied().unwrap_or(false)),
                    Err(e) => {
                        tracing::error!(shard = self.shard, pk, error = %e, "worker callback failed, cooling down");
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        results.push(false);
                    }
                }
            }
            results
        };

        let failures = results.iter().filter(|ok| !**ok).count();

        for (pk, ok) in batch.into_iter().zip(results) {
            if ok {
                self.retries.clear(&pk);
                continue;
            }
            if !self.config.retry {
                tracing::warn!(shard = self.shard, pk, "pk failed, retry disabled, dropping");
                continue;
            }
            let attempts = self.retries.increment(&pk);
            if attempts > self.config.max_retry_count {
                tracing::error!(shard = self.shard, pk, attempts, "pk exceeded max retry count, dropping");
                self.retries.clear(&pk);
                continue;
            }
            tracing::warn!(shard = self.shard, pk, attempts, "retrying pk");
            let _ = self.tx.enqueue(pk);
        }

        if failures > 0 {
            let backoff = Duration::from_secs(3 * failures as u64).min(self.config.max_retry_interval);
            tracing::warn!(shard = self.shard, failures, backoff_secs = backoff.as_secs(), "cooling down after batch failures");
            tokio::time::sleep(backoff).await;
        }
    }
}
