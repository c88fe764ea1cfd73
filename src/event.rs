//! Core data model: events, primary keys, and the transactional event set
//! shared by the binlog and ORM publishers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar column value as it appears in a row payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Text(String),
    Bytes(Vec<u8>),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Value::Null => write!(f, ""),
        }
    }
}

/// A primary key: a single scalar, or an ordered tuple for composite keys.
///
/// If the table's primary key is a single column, its value is unwrapped
/// to a scalar; otherwise this holds an ordered tuple of the named
/// columns' values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimaryKey {
    Single(Value),
    Composite(Vec<Value>),
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Single(v) => write!(f, "{v}"),
            PrimaryKey::Composite(vs) => {
                let parts: Vec<String> = vs.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// The three mutation kinds a publisher can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Write,
    Update,
    Delete,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Write => "write",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `"{table}_{action}"`, used as both signal name and transport topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(table: &str, action: Action) -> Self {
        Topic(format!("{table}_{action}"))
    }

    /// The `_raw` twin signal name carrying the full row payload.
    pub fn raw(&self) -> String {
        format!("{}_raw", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(table, action, pk, ts)` tuple, the unit the whole pipeline moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub table: String,
    pub action: Action,
    pub pk: PrimaryKey,
    pub ts: i64,
}

impl Event {
    pub fn topic(&self) -> Topic {
        Topic::new(&self.table, self.action)
    }
}

/// Side-channel payload accompanying an [`Event`]: full post-image/pre-image
/// for write/delete, both images for update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRowEvent {
    pub table: String,
    pub action: Action,
    pub before: Option<HashMap<String, Value>>,
    pub after: Option<HashMap<String, Value>>,
}

/// The position reached in the primary's replication stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogCursor {
    pub log_file: String,
    pub log_pos: u32,
}

impl fmt::Display for BinlogCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_pos)
    }
}

/// A transaction's staged mutations: `"{table}_{action}"` mapped to the set
/// of pks captured during the transaction, cumulative across flushes.
pub type EventSet = HashMap<String, Vec<PrimaryKey>>;

/// Phase of an ORM-tracked transaction. Rollback is a terminal non-commit
/// transition, modeled as its own variant so callers can distinguish it from
/// a successful commit without inspecting side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPhase {
    Prepare,
    Commit,
    Rollback,
}

/// Typed payload carried over the [`crate::signal_bus::SignalBus`]: one
/// variant per kind of signal rather than an opaque dynamically-typed
/// payload.
#[derive(Debug, Clone)]
pub enum SignalPayload {
    Pk(PrimaryKey),
    Raw(RawRowEvent),
    Cursor(BinlogCursor),
    TransactionPrepare { tid: String, event_set: EventSet },
    TransactionCommit { tid: String },
    TransactionRollback { tid: String },
}

pub const SIGNAL_BINLOG_POS: &str = "mysql_binlog_pos";
pub const SIGNAL_SESSION_PREPARE: &str = "session_prepare";
pub const SIGNAL_SESSION_COMMIT: &str = "session_commit";
pub const SIGNAL_SESSION_ROLLBACK: &str = "session_rollback";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_formats_table_action() {
        let t = Topic::new("test", Action::Write);
        assert_eq!(t.to_string(), "test_write");
        assert_eq!(t.raw(), "test_write_raw");
    }

    #[test]
    fn composite_pk_displays_as_ordered_tuple() {
        let pk = PrimaryKey::Composite(vec![Value::Int(1), Value::Text("a".into())]);
        assert_eq!(pk.to_string(), "1,a");
    }
}
