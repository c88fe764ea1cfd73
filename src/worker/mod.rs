//! Per-shard worker queues and consumer loop.

pub mod queue;
pub mod worker;

pub use queue::{RetryCounter, WorkerQueue, WorkerQueueReceiver};
pub use worker::{Worker, WorkerCallback};
