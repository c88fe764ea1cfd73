//! The Redis-backed stores shared across publisher handlers: the
//! append-only event store and the prepare-commit transaction log.

pub mod event_store;
pub mod prepare_commit;

pub use event_store::{EventStore, RedisEventStore};
pub use prepare_commit::{ErrorMode, Namespace, Phase, PrepareCommitLog, RedisPrepareCommitLog};
