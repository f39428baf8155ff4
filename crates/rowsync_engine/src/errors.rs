//! Error classification and the errors table.
//!
//! Rows that fail to apply are classified by the error handler. Rows that
//! must be remembered land in an [`ErrorsTable`], keyed by table and primary
//! key so a row has at most one record. At the end of a pass the table is
//! written out as an error batch, in the same part format as any incoming
//! batch, and replayed by the next pass.

use crate::error::{AdapterError, SyncError, SyncResult};
use crate::executor::{ApplyContext, RowOutcome};
use crate::provider::{SyncCommand, SyncProvider};
use rowsync_model::{
    BatchInfo, ChangeDirection, ErrorAction, ModelResult, RowKey, RowState, SyncRow, SyncTable,
    TableChangesApplied, TableName,
};
use rowsync_storage::{BatchStorage, BatchWriter, StorageResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A row that failed to apply, as presented to a [`crate::ErrorHandler`].
#[derive(Debug, Clone)]
pub struct SyncRowError {
    /// Table the row belongs to.
    pub table: TableName,
    /// Direction being applied.
    pub direction: ChangeDirection,
    /// The row, in the shape of the table's writable columns.
    pub row: SyncRow,
    /// The error the store raised.
    pub error: AdapterError,
}

/// One persisted failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// The row, tagged with its retry or terminal state.
    pub row: SyncRow,
    /// Why it failed.
    pub message: String,
}

#[derive(Debug, Clone)]
struct TableErrors {
    schema: SyncTable,
    rows: BTreeMap<RowKey, ErrorRecord>,
}

/// Failed rows of one pass, at most one per (table, primary key).
#[derive(Debug, Clone, Default)]
pub struct ErrorsTable {
    tables: BTreeMap<TableName, TableErrors>,
}

impl ErrorsTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed row, replacing any earlier record for the same key.
    ///
    /// # Errors
    ///
    /// Fails if the row's key cannot be computed.
    pub fn record(
        &mut self,
        table: &SyncTable,
        row: SyncRow,
        message: impl Into<String>,
    ) -> ModelResult<()> {
        let key = row.key(table)?;
        let entry = self
            .tables
            .entry(table.name.clone())
            .or_insert_with(|| TableErrors {
                schema: table.clone(),
                rows: BTreeMap::new(),
            });
        entry.rows.insert(
            key,
            ErrorRecord {
                row,
                message: message.into(),
            },
        );
        Ok(())
    }

    /// Removes the record for a key. Returns true if one existed.
    pub fn remove(&mut self, table: &TableName, key: &RowKey) -> bool {
        let Some(entry) = self.tables.get_mut(table) else {
            return false;
        };
        let removed = entry.rows.remove(key).is_some();
        if entry.rows.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    /// Returns the record for a key.
    pub fn get(&self, table: &TableName, key: &RowKey) -> Option<&ErrorRecord> {
        self.tables.get(table)?.rows.get(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }

    /// Returns true if no row is recorded.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of records the next pass will replay.
    pub fn retry_count(&self) -> usize {
        self.records().filter(|(_, r)| r.row.state.is_retry()).count()
    }

    /// Iterates over all records, by table then key.
    pub fn records(&self) -> impl Iterator<Item = (&TableName, &ErrorRecord)> {
        self.tables
            .iter()
            .flat_map(|(name, t)| t.rows.values().map(move |r| (name, r)))
    }

    /// Writes the records as a batch under `directory`.
    ///
    /// # Errors
    ///
    /// Returns the first storage error.
    pub fn write_batch(
        &self,
        storage: &dyn BatchStorage,
        directory: PathBuf,
        max_rows_per_part: usize,
    ) -> StorageResult<BatchInfo> {
        let mut writer = BatchWriter::new(storage, BatchInfo::new(directory), max_rows_per_part);
        for errors in self.tables.values() {
            let rows = errors.rows.values().map(|r| r.row.clone()).collect();
            writer.write_table(&errors.schema, rows)?;
        }
        Ok(writer.finish())
    }
}

/// Classifies failed rows and records them.
///
/// Every failed row ends up either applied (after a `Resolved` retry) or
/// counted as failed. Returns `Err` when a row is classified `Throw`.
pub(crate) fn handle_failed_rows<P: SyncProvider>(
    ctx: &ApplyContext<'_, P>,
    conn: &mut P::Connection,
    table: &SyncTable,
    command: &SyncCommand,
    failed: Vec<SyncRowError>,
    changes: &mut TableChangesApplied,
    errors: &mut ErrorsTable,
) -> SyncResult<()> {
    for failure in failed {
        let action = ctx.interceptors.classify_error(&failure);
        let direction = failure.direction;
        match action {
            ErrorAction::Ignore => {
                debug!(table = %table.name, error = %failure.error, "row error ignored");
                changes.failed += 1;
            }
            ErrorAction::Resolved => match ctx.execute_row(conn, command, table, &failure.row)? {
                RowOutcome::Applied => changes.applied += 1,
                RowOutcome::Conflict => {
                    changes.failed += 1;
                    errors.record(
                        table,
                        failure.row.with_state(RowState::retry_for(direction)),
                        "retry after resolution affected no rows",
                    )?;
                }
                RowOutcome::Error(error) => {
                    changes.failed += 1;
                    errors.record(
                        table,
                        failure.row.with_state(RowState::retry_for(direction)),
                        error.to_string(),
                    )?;
                }
            },
            ErrorAction::Log => {
                warn!(table = %table.name, error = %failure.error, "row failed, queued for next sync");
                changes.failed += 1;
                errors.record(
                    table,
                    failure.row.with_state(RowState::retry_for(direction)),
                    failure.error.to_string(),
                )?;
            }
            ErrorAction::Continue => {
                warn!(table = %table.name, error = %failure.error, "row failed, not retried");
                changes.failed += 1;
                errors.record(
                    table,
                    failure.row.with_state(RowState::failed_for(direction)),
                    failure.error.to_string(),
                )?;
            }
            ErrorAction::Throw => {
                changes.failed += 1;
                errors.record(
                    table,
                    failure.row.with_state(RowState::retry_for(direction)),
                    failure.error.to_string(),
                )?;
                return Err(SyncError::RowApplyFailed {
                    table: table.name.clone(),
                    error: failure.error,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_model::{DataType, SyncColumn, Value};
    use rowsync_storage::InMemoryBatchStorage;

    fn table(name: &str) -> SyncTable {
        SyncTable::new(TableName::new(name))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_column(SyncColumn::new("v", DataType::Text))
            .with_primary_keys(["id"])
    }

    fn row(id: i64, v: &str, state: RowState) -> SyncRow {
        SyncRow::new(vec![id.into(), v.into()], state)
    }

    #[test]
    fn one_record_per_key() {
        let mut errors = ErrorsTable::new();
        let t = table("A");
        errors
            .record(&t, row(1, "x", RowState::RetryModifiedOnNextSync), "first")
            .unwrap();
        errors
            .record(&t, row(1, "y", RowState::RetryDeletedOnNextSync), "second")
            .unwrap();
        errors
            .record(&t, row(2, "z", RowState::ApplyModifiedFailed), "third")
            .unwrap();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.retry_count(), 1);
        let key = row(1, "", RowState::None).key(&t).unwrap();
        let record = errors.get(&t.name, &key).unwrap();
        assert_eq!(record.message, "second");
        assert_eq!(record.row.values[1], Value::from("y"));
    }

    #[test]
    fn remove_drops_empty_tables() {
        let mut errors = ErrorsTable::new();
        let t = table("A");
        let r = row(1, "x", RowState::RetryModifiedOnNextSync);
        let key = r.key(&t).unwrap();
        errors.record(&t, r, "e").unwrap();

        assert!(errors.remove(&t.name, &key));
        assert!(!errors.remove(&t.name, &key));
        assert!(errors.is_empty());
    }

    #[test]
    fn written_batch_replays_rows() {
        let storage = InMemoryBatchStorage::new();
        let mut errors = ErrorsTable::new();
        for id in 0..5 {
            errors
                .record(&table("A"), row(id, "a", RowState::RetryModifiedOnNextSync), "e")
                .unwrap();
        }
        errors
            .record(&table("B"), row(1, "b", RowState::ApplyDeletedFailed), "e")
            .unwrap();

        let batch = errors
            .write_batch(&storage, PathBuf::from("errors/1"), 2)
            .unwrap();
        assert_eq!(batch.row_count(), 6);
        assert_eq!(batch.parts.len(), 4);
        assert!(batch.is_well_formed());

        let b_table = TableName::new("B");
        let b_part = batch.parts_for(&b_table).next().unwrap();
        let rows: Vec<_> = storage
            .open_part(&batch.directory, b_part)
            .unwrap()
            .collect::<StorageResult<_>>()
            .unwrap();
        assert_eq!(rows, vec![row(1, "b", RowState::ApplyDeletedFailed)]);
    }
}
