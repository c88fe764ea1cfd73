//! Per-session staging state kept by [`crate::orm::OrmPublisher`] instead of
//! stashing attributes on the ORM session object itself.

use std::collections::HashMap;

use crate::event::{Action, EventSet, PrimaryKey, RawRowEvent, Value};

/// Identity of an ORM session instance, supplied by the host application.
pub type SessionId = String;

/// Anything the ORM publisher can observe mutated within a unit of work.
/// Implemented by the host application's model/mapper types.
pub trait TrackedObject: Send + Sync {
    fn table(&self) -> &str;
    /// Mapper-defined primary-key columns, read in declared order and
    /// unwrapped if there is exactly one.
    fn primary_key(&self) -> PrimaryKey;
    /// The object's column values at flush time, carried on the `_raw`
    /// twin signal alongside the pk signal.
    fn raw_values(&self) -> HashMap<String, Value>;
}

/// A pending mutation captured during a flush, before it is known whether
/// the surrounding transaction will commit.
pub struct PendingObject {
    pub table: String,
    pub action: Action,
    pub pk: PrimaryKey,
    pub raw: RawRowEvent,
}

/// Build the `_raw` twin payload for one tracked object: a write/update
/// carries its post-image in `after`, a delete carries its last-known image
/// in `before` (the ORM hooks only ever observe one snapshot per object, so
/// there is no separate pre-image to report for updates).
fn raw_event(table: &str, action: Action, values: HashMap<String, Value>) -> RawRowEvent {
    RawRowEvent {
        table: table.to_string(),
        action,
        before: matches!(action, Action::Delete).then(|| values.clone()),
        after: matches!(action, Action::Write | Action::Update).then_some(values),
    }
}

/// Per-session staging state, cleared on terminal transition (commit or
/// rollback). Multiple flushes within one transaction accumulate into one
/// cumulative event set.
#[derive(Default)]
pub struct SessionState {
    /// Transaction-unique identifier, assigned lazily on the first
    /// signal-emitting hook.
    pub tid: Option<String>,
    /// Cumulative `"{table}_{action}"` -> pks, used for `session_prepare`.
    pub event_set: EventSet,
    /// Flat pending mutations awaiting `after_commit` publication.
    pub pending: Vec<PendingObject>,
}

impl SessionState {
    /// Merge one tracked object into both the flat pending list and the
    /// cumulative event set, the way repeated `before_flush`/`after_flush`
    /// calls within one transaction accumulate: each `after_flush` emits the
    /// cumulative prepare event built so far.
    pub fn stage(&mut self, table: &str, action: Action, pk: PrimaryKey, raw_values: HashMap<String, Value>) {
        let key = format!("{table}_{action}");
        self.event_set.entry(key).or_default().push(pk.clone());
        self.pending.push(PendingObject {
            table: table.to_string(),
            action,
            pk,
            raw: raw_event(table, action, raw_values),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.event_set.is_empty()
    }

    pub fn clear(&mut self) {
        self.tid = None;
        self.event_set.clear();
        self.pending.clear();
    }
}
