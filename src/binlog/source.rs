//! The external replication-protocol boundary. The MySQL replication
//! protocol parser is treated as an external library; [`BinlogSource`]
//! is the seam a real client (e.g. a `mysql_cdc`-style crate) plugs into.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BinlogError;
use crate::event::Value;

/// The three row-mutation kinds read off the replication log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Write,
    Update,
    Delete,
}

/// One row event read from the replication stream, already filtered to
/// the write/update/delete event kinds only.
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub table: String,
    pub kind: RowKind,
    /// The table's primary-key column names in declared order. Empty means
    /// the table declares no primary key, and the row is skipped.
    pub primary_key_cols: Vec<String>,
    /// Row values: post-image for write, pre-image for delete, the row as
    /// it existed before an update.
    pub values: HashMap<String, Value>,
    /// Post-update values; only meaningful for `RowKind::Update`.
    pub after_values: HashMap<String, Value>,
    pub log_file: String,
    pub log_pos: u32,
    /// Server wall-clock seconds, not part of the emitted event key but
    /// included in structured logging.
    pub server_ts: i64,
}

/// A live or replayed connection to a MySQL primary's row-based replication
/// stream. Implementations own the socket handshake and binlog wire decode;
/// this crate only consumes already-decoded [`RowEvent`]s.
#[async_trait]
pub trait BinlogSource: Send {
    /// Read the next row event, or `None` when the stream has been drained
    /// (non-blocking mode reaches the end of the log and exits).
    async fn next_row_event(&mut self) -> Result<Option<RowEvent>, BinlogError>;
}

/// An in-memory [`BinlogSource`] used by tests and scenario fixtures,
/// driving a fixed sequence of row events through a queue.
pub struct FakeBinlogSource {
    events: std::collections::VecDeque<RowEvent>,
}

impl FakeBinlogSource {
    pub fn new(events: Vec<RowEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

#[async_trait]
impl BinlogSource for FakeBinlogSource {
    async fn next_row_event(&mut self) -> Result<Option<RowEvent>, BinlogError> {
        Ok(self.events.pop_front())
    }
}
