//! Converts replication-log row events into typed `table_action` signals.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::binlog::source::{BinlogSource, RowEvent, RowKind};
use crate::config::BinlogConfig;
use crate::error::BinlogError;
use crate::event::{Action, BinlogCursor, PrimaryKey, RawRowEvent, SignalPayload, Value, SIGNAL_BINLOG_POS};
use crate::signal_bus::SignalBus;

/// Consumes a [`BinlogSource`], filters by table, resolves primary keys, and
/// publishes `table_action`/`table_action_raw` signals plus a
/// `mysql_binlog_pos` cursor signal after every row.
pub struct BinlogPublisher<S: BinlogSource> {
    source: S,
    config: BinlogConfig,
    bus: std::sync::Arc<SignalBus>,
}

impl<S: BinlogSource> BinlogPublisher<S> {
    pub fn new(source: S, config: BinlogConfig, bus: std::sync::Arc<SignalBus>) -> Self {
        Self {
            source,
            config,
            bus,
        }
    }

    /// Drive the source to completion (non-blocking mode) or forever
    /// (blocking mode), publishing signals for every handled row.
    #[tracing::instrument(skip(self), fields(blocking = self.config.blocking))]
    pub async fn run(&mut self) -> Result<(), BinlogError> {
        loop {
            match self.source.next_row_event().await {
                Ok(Some(row)) => self.handle_row(row),
                Ok(None) => {
                    if self.config.blocking {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        continue;
                    }
                    info!("binlog source drained, exiting (non-blocking mode)");
                    return Ok(());
                }
                Err(e) => {
                    // Decode errors are logged and skipped; a source-level
                    // error (connection lost) still aborts the stream since
                    // there is nothing left to skip past.
                    match &e {
                        BinlogError::Decode(_) => {
                            warn!(error = %e, "failed to decode row event, skipping");
                            continue;
                        }
                        _ => return Err(e),
                    }
                }
            }
        }
    }

    fn handle_row(&mut self, row: RowEvent) {
        if let Some(tables) = &self.config.tables {
            if !tables.iter().any(|t| t == &row.table) {
                return;
            }
        }

        if row.primary_key_cols.is_empty() {
            debug!(table = %row.table, "row carries no primary key metadata, skipping");
            return;
        }

        let action = match row.kind {
            RowKind::Write => Action::Write,
            RowKind::Update => Action::Update,
            RowKind::Delete => Action::Delete,
        };

        let source_values = match row.kind {
            RowKind::Update => &row.after_values,
            RowKind::Write | RowKind::Delete => &row.values,
        };

        let pk = match extract_primary_key(&row.primary_key_cols, source_values) {
            Some(pk) => pk,
            None => {
                warn!(table = %row.table, "primary key column missing from row values, skipping");
                return;
            }
        };

        let topic = crate::event::Topic::new(&row.table, action);
        self.bus.send(
            &topic.0,
            None,
            &SignalPayload::Pk(pk),
        );

        let raw = RawRowEvent {
            table: row.table.clone(),
            action,
            before: matches!(row.kind, RowKind::Update | RowKind::Delete)
                .then(|| row.values.clone()),
            after: matches!(row.kind, RowKind::Update | RowKind::Write)
                .then(|| row.after_values_or_values()),
        };
        self.bus.send(&topic.raw(), None, &SignalPayload::Raw(raw));

        let cursor = BinlogCursor {
            log_file: row.log_file.clone(),
            log_pos: row.log_pos,
        };
        self.bus
            .send(SIGNAL_BINLOG_POS, None, &SignalPayload::Cursor(cursor));
    }
}

impl RowEvent {
    fn after_values_or_values(&self) -> HashMap<String, Value> {
        match self.kind {
            RowKind::Update => self.after_values.clone(),
            RowKind::Write | RowKind::Delete => self.values.clone(),
        }
    }
}

/// Resolve `pk`: a single named column is unwrapped to a scalar; more than
/// one column yields an ordered [`PrimaryKey::Composite`].
fn extract_primary_key(
    cols: &[String],
    values: &HashMap<String, Value>,
) -> Option<PrimaryKey> {
    if cols.len() == 1 {
        return values.get(&cols[0]).cloned().map(PrimaryKey::Single);
    }
    let mut out = Vec::with_capacity(cols.len());
    for col in cols {
        out.push(values.get(col).cloned()?);
    }
    Some(PrimaryKey::Composite(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::source::FakeBinlogSource;
    use crate::event::SignalPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn row(table: &str, kind: RowKind, id: i64, data: &str) -> RowEvent {
        let mut values = HashMap::new();
        values.insert("id".to_string(), Value::Int(id));
        values.insert("data".to_string(), Value::Text(data.to_string()));
        RowEvent {
            table: table.to_string(),
            kind,
            primary_key_cols: vec!["id".to_string()],
            values: values.clone(),
            after_values: values,
            log_file: "mysql-bin.000001".to_string(),
            log_pos: 100,
            server_ts: 0,
        }
    }

    #[tokio::test]
    async fn translates_insert_update_delete_sql_scenario() {
        // Simplified to one pk per row event: this fixture models rows as
        // already split the way the replication client would hand them to
        // us, one RowEvent per affected row.
        let rows = vec![
            row("test", RowKind::Write, 1, "a"),
            row("test", RowKind::Write, 2, "b"),
            row("test", RowKind::Write, 3, "c"),
            row("test", RowKind::Write, 4, "d"),
            row("test", RowKind::Update, 1, "aa"),
            row("test", RowKind::Update, 2, "bb"),
            row("test", RowKind::Update, 2, "cc"),
            row("test", RowKind::Update, 3, "cc"),
            row("test", RowKind::Update, 4, "cc"),
            row("test", RowKind::Delete, 2, "cc"),
            row("test", RowKind::Delete, 3, "cc"),
            row("test", RowKind::Delete, 4, "cc"),
            row("test", RowKind::Delete, 1, "aa"),
        ];

        let bus = Arc::new(SignalBus::new());
        let writes = Arc::new(Mutex::new(Vec::new()));
        let updates = Arc::new(Mutex::new(Vec::new()));
        let deletes = Arc::new(Mutex::new(Vec::new()));
        let pos_count = Arc::new(AtomicUsize::new(0));

        for (topic, sink) in [
            ("test_write", Arc::clone(&writes)),
            ("test_update", Arc::clone(&updates)),
            ("test_delete", Arc::clone(&deletes)),
        ] {
            bus.connect(
                topic,
                Arc::new(move |p: &SignalPayload| {
                    if let SignalPayload::Pk(pk) = p {
                        sink.lock().unwrap().push(pk.to_string());
                    }
                    Ok(())
                }),
            );
        }

        let pos_count2 = Arc::clone(&pos_count);
        bus.connect(
            SIGNAL_BINLOG_POS,
            Arc::new(move |_| {
                pos_count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let mut publisher = BinlogPublisher::new(
            FakeBinlogSource::new(rows),
            BinlogConfig {
                blocking: false,
                ..Default::default()
            },
            bus,
        );
        publisher.run().await.unwrap();

        assert_eq!(*writes.lock().unwrap(), vec!["1", "2", "3", "4"]);
        assert_eq!(*updates.lock().unwrap(), vec!["1", "2", "2", "3", "4"]);
        assert_eq!(*deletes.lock().unwrap(), vec!["2", "3", "4", "1"]);
        assert_eq!(pos_count.load(Ordering::SeqCst), 13);
    }

    #[tokio::test]
    async fn skips_rows_missing_primary_key_columns() {
        let bus = Arc::new(SignalBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        bus.connect(
            "test_write",
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let mut no_pk_row = row("test", RowKind::Write, 1, "a");
        no_pk_row.primary_key_cols.clear();

        let mut publisher = BinlogPublisher::new(
            FakeBinlogSource::new(vec![no_pk_row]),
            BinlogConfig {
                blocking: false,
                ..Default::default()
            },
            bus,
        );
        publisher.run().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn table_filter_suppresses_other_tables() {
        let bus = Arc::new(SignalBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        bus.connect(
            "other_write",
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let mut publisher = BinlogPublisher::new(
            FakeBinlogSource::new(vec![row("other", RowKind::Write, 1, "a")]),
            BinlogConfig {
                blocking: false,
                tables: Some(vec!["test".to_string()]),
                ..Default::default()
            },
            bus,
        );
        publisher.run().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
