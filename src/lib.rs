//! Change-data-capture and event-routing pipeline for relational databases.
//!
//! Two publishers (binlog-sourced, ORM-session-sourced) emit typed
//! `table_action` signals onto a process-local [`signal_bus::SignalBus`].
//! Subscribers route those signals into an [`store::event_store::EventStore`],
//! a [`store::prepare_commit::PrepareCommitLog`], or an outbound transport
//! that a [`replicator::Replicator`] shards across a [`worker_pool::WorkerPool`].

pub mod binlog;
pub mod config;
pub mod error;
pub mod event;
pub mod hash_ring;
pub mod orm;
pub mod replicator;
pub mod signal_bus;
pub mod store;
pub mod worker;
pub mod worker_pool;

pub use config::MeepoConfig;
pub use error::MeepoError;
pub use event::{Action, Event, PrimaryKey, SignalPayload, Topic};
pub use hash_ring::ConsistentHashRing;
pub use signal_bus::SignalBus;
