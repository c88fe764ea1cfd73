//! Hooks on an ORM session factory that translate flush/commit/rollback
//! callbacks into the same signal shape the binlog publisher emits.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::event::{Action, SignalPayload, Topic, SIGNAL_SESSION_COMMIT, SIGNAL_SESSION_PREPARE, SIGNAL_SESSION_ROLLBACK};
use crate::orm::session::{SessionId, SessionState, TrackedObject};
use crate::signal_bus::{SenderKey, SignalBus};

/// Which hook set is installed on the session factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `before_flush` collects, `after_commit` publishes. No durability.
    Simple,
    /// Simple mode plus `after_flush` -> `session_prepare` and
    /// `after_commit`/`after_rollback` -> `session_commit`/`session_rollback`.
    PrepareCommit,
}

/// Translates ORM session lifecycle callbacks into `table_action` signals.
///
/// Bulk ORM operations that bypass the unit-of-work are never observed —
/// documented behavior, not a bug.
pub struct OrmPublisher {
    bus: Arc<SignalBus>,
    mode: Mode,
    tables: Mutex<HashSet<String>>,
    sessions: DashMap<SessionId, SessionState>,
    sender: Option<SenderKey>,
}

impl OrmPublisher {
    pub fn new(bus: Arc<SignalBus>, mode: Mode, tables: HashSet<String>, sender: Option<SenderKey>) -> Self {
        Self {
            bus,
            mode,
            tables: Mutex::new(tables),
            sessions: DashMap::new(),
            sender,
        }
    }

    /// Add tables to the watch set. Re-installation on the same factory
    /// merges sets (set union), idempotently.
    pub fn watch_tables(&self, tables: impl IntoIterator<Item = String>) {
        self.tables.lock().extend(tables);
    }

    fn is_watched(&self, table: &str) -> bool {
        let tables = self.tables.lock();
        tables.is_empty() || tables.contains(table)
    }

    /// Hook: `before_flush`. Collect `new`/`dirty`/`deleted` into the
    /// session's pending mutations, filtered by the watched-table set.
    pub fn before_flush(
        &self,
        session_id: &SessionId,
        new: &[&dyn TrackedObject],
        dirty: &[&dyn TrackedObject],
        deleted: &[&dyn TrackedObject],
    ) {
        let mut state = self.sessions.entry(session_id.clone()).or_default();
        for (objects, action) in [
            (new, Action::Write),
            (dirty, Action::Update),
            (deleted, Action::Delete),
        ] {
            for obj in objects {
                if !self.is_watched(obj.table()) {
                    continue;
                }
                state.stage(obj.table(), action, obj.primary_key(), obj.raw_values());
            }
        }
    }

    /// Hook: `after_flush`. Prepare-commit mode only: assemble the
    /// cumulative event set and send `session_prepare`. A transaction
    /// that has staged nothing never fires `session_prepare`.
    pub fn after_flush(&self, session_id: &SessionId) {
        if self.mode != Mode::PrepareCommit {
            return;
        }
        let Some(mut state) = self.sessions.get_mut(session_id) else {
            return;
        };
        if state.is_empty() {
            return;
        }
        if state.tid.is_none() {
            state.tid = Some(Uuid::new_v4().to_string());
        }
        let tid = state.tid.clone().expect("just assigned");
        let event_set = state.event_set.clone();
        drop(state);

        self.bus.send(
            SIGNAL_SESSION_PREPARE,
            self.sender.as_ref(),
            &SignalPayload::TransactionPrepare { tid, event_set },
        );
    }

    /// Hook: `after_commit`. Publish pk + raw signals for every staged
    /// mutation, then (prepare-commit mode) send `session_commit`. Empty
    /// transactions are no-ops.
    pub fn after_commit(&self, session_id: &SessionId) {
        let Some((_, mut state)) = self.sessions.remove(session_id) else {
            return;
        };
        if state.pending.is_empty() {
            return;
        }

        for obj in state.pending.drain(..) {
            let topic = Topic::new(&obj.table, obj.action);
            self.bus
                .send(&topic.0, self.sender.as_ref(), &SignalPayload::Pk(obj.pk));
            self.bus
                .send(&topic.raw(), self.sender.as_ref(), &SignalPayload::Raw(obj.raw));
        }

        if self.mode == Mode::PrepareCommit {
            if let Some(tid) = state.tid.take() {
                self.bus.send(
                    SIGNAL_SESSION_COMMIT,
                    self.sender.as_ref(),
                    &SignalPayload::TransactionCommit { tid },
                );
            }
        }
    }

    /// Hook: `after_rollback`. Prepare-commit mode only: send
    /// `session_rollback` and discard staged events without publishing.
    pub fn after_rollback(&self, session_id: &SessionId) {
        let Some((_, state)) = self.sessions.remove(session_id) else {
            return;
        };
        if self.mode != Mode::PrepareCommit {
            return;
        }
        if let Some(tid) = state.tid {
            self.bus.send(
                SIGNAL_SESSION_ROLLBACK,
                self.sender.as_ref(),
                &SignalPayload::TransactionRollback { tid },
            );
        }
    }
}
