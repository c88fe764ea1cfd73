//! Bounded-queue consumer building blocks: `WorkerQueue` and `RetryCounter`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::WorkerError;

/// MPSC queue of pks, single-producer (the receiver loop) and
/// single-consumer (one worker), by construction.
///
/// The channel itself is unbounded; `queue_limit` instead governs when the
/// worker's dedup pass runs, which is a distinct concern from
/// transport-level backpressure.
#[derive(Clone)]
pub struct WorkerQueue {
    tx: mpsc::UnboundedSender<String>,
    depth: Arc<AtomicUsize>,
}

/// Receiving half, owned by exactly one [`super::worker::Worker`].
pub struct WorkerQueueReceiver {
    rx: mpsc::UnboundedReceiver<String>,
    depth: Arc<AtomicUsize>,
}

impl WorkerQueue {
    pub fn channel() -> (WorkerQueue, WorkerQueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            WorkerQueue {
                tx,
                depth: Arc::clone(&depth),
            },
            WorkerQueueReceiver { rx, depth },
        )
    }

    pub fn enqueue(&self, pk: String) -> Result<(), WorkerError> {
        self.tx
            .send(pk)
            .map_err(|_| WorkerError::QueueClosed(0))?;
        self.depth.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Advisory depth probe. Always available on this platform (a plain
    /// atomic counter), but kept as a best-effort `usize` return — callers
    /// that log it should treat absence of movement as "unknown", not
    /// "empty".
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl WorkerQueueReceiver {
    /// Drain up to `max` items, awaiting the first one.
    pub async fn recv_batch(&mut self, max: usize) -> Vec<String> {
        let mut batch = Vec::new();
        if let Some(first) = self.rx.recv().await {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            batch.push(first);
        } else {
            return batch;
        }
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(pk) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    batch.push(pk);
                }
                Err(_) => break,
            }
        }
        batch
    }

    /// Drain the entire queue into a set, re-enqueuing unique values through
    /// `tx` — the deduplication pass.
    pub fn dedup_drain(&mut self, tx: &WorkerQueue) {
        let mut seen = HashSet::new();
        while let Ok(pk) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            seen.insert(pk);
        }
        for pk in seen {
            let _ = tx.enqueue(pk);
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// `pk -> attempts`. Cleared on success, removed with an error log when
/// `attempts > max_retry_count`.
#[derive(Default)]
pub struct RetryCounter {
    attempts: std::collections::HashMap<String, u32>,
}

impl RetryCounter {
    pub fn clear(&mut self, pk: &str) {
        self.attempts.remove(pk);
    }

    /// Increment the counter for `pk`, returning the new attempt count.
    pub fn increment(&mut self, pk: &str) -> u32 {
        let entry = self.attempts.entry(pk.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_drain_collapses_duplicates() {
        let (tx, mut rx) = WorkerQueue::channel();
        for pk in ["1", "2", "1", "3", "2"] {
            tx.enqueue(pk.to_string()).unwrap();
        }
        assert_eq!(rx.depth(), 5);
        rx.dedup_drain(&tx);

        let mut drained = Vec::new();
        while let Some(pk) = rx.rx.try_recv().ok() {
            drained.push(pk);
        }
        drained.sort();
        assert_eq!(drained, vec!["1", "2", "3"]);
    }

    #[test]
    fn retry_counter_tracks_and_clears() {
        let mut counter = RetryCounter::default();
        assert_eq!(counter.increment("1"), 1);
        assert_eq!(counter.increment("1"), 2);
        counter.clear("1");
        assert_eq!(counter.increment("1"), 1);
    }
}
