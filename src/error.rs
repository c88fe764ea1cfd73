//! Error taxonomy for the meepo pipeline.
//!
//! Each subsystem gets its own variant set; [`MeepoError`] composes them so
//! callers that cross subsystem boundaries (e.g. the replicator driving both
//! a transport and a worker pool) can propagate a single error type.

use thiserror::Error;

/// Errors raised while decoding or translating binlog row events.
#[derive(Debug, Error)]
pub enum BinlogError {
    #[error("row event for table {table} carries no primary key metadata")]
    MissingPrimaryKey { table: String },

    #[error("failed to decode row event: {0}")]
    Decode(String),

    #[error("upstream replication source error: {0}")]
    Source(String),
}

/// Errors raised by the ORM-session publisher.
#[derive(Debug, Error)]
pub enum OrmError {
    #[error("session {0} has no staged transaction state")]
    NoSession(String),

    #[error("prepare-commit log error: {0}")]
    PrepareCommit(#[from] StoreError),
}

/// Errors raised by the Redis-backed stores ([`EventStore`](crate::store::event_store::EventStore)
/// and [`PrepareCommitLog`](crate::store::prepare_commit::PrepareCommitLog)).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error talking to store: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("failed to serialize event set: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transaction {0} has no recorded event set")]
    NoEventSet(String),
}

/// Errors raised by workers and the worker pool.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("user callback panicked or returned an error: {0}")]
    Callback(String),

    #[error("worker queue for shard {0} is gone")]
    QueueClosed(usize),
}

/// Errors raised by the replicator's transport and dispatch loop.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0:?}")]
    MalformedFrame(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Top-level error type unifying every subsystem.
#[derive(Debug, Error)]
pub enum MeepoError {
    #[error(transparent)]
    Binlog(#[from] BinlogError),

    #[error(transparent)]
    Orm(#[from] OrmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Replicator(#[from] ReplicatorError),

    #[error("configuration error: {0}")]
    Config(String),
}
