//! Apply executor: bulk first, single rows on bulk failure.

use crate::config::{SyncOptions, TransactionMode};
use crate::conflict::resolve_conflict;
use crate::error::{AdapterError, SyncError, SyncResult};
use crate::errors::{handle_failed_rows, ErrorsTable, SyncRowError};
use crate::interceptors::SyncInterceptors;
use crate::provider::{ApplyArgs, CommandType, SyncCommand, SyncProvider};
use rowsync_model::{
    BatchInfo, BatchPartInfo, ChangeDirection, DatabaseChangesApplied, RowState, SyncRow,
    SyncTable, TableChangesApplied,
};
use rowsync_storage::{BatchStorage, PartReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Result of executing one row.
#[derive(Debug)]
pub(crate) enum RowOutcome {
    /// At least one row was affected.
    Applied,
    /// Nothing was affected: the local version moved on.
    Conflict,
    /// The statement failed.
    Error(AdapterError),
}

/// Commands prepared for one table and direction.
#[derive(Debug, Clone)]
pub(crate) struct TableCommands {
    pub single: SyncCommand,
    pub bulk: Option<SyncCommand>,
}

/// Lazy, forward-only chunks of the rows of one part.
pub(crate) struct PartChunks<'t> {
    reader: PartReader,
    source: SyncTable,
    writable: &'t SyncTable,
    direction: ChangeDirection,
    keep: fn(&RowState, ChangeDirection) -> bool,
    size: usize,
}

impl Iterator for PartChunks<'_> {
    type Item = SyncResult<Vec<SyncRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.size.min(self.reader.remaining() as usize));
        for row in self.reader.by_ref() {
            let row = match row {
                Ok(row) => row,
                Err(e) => return Some(Err(e.into())),
            };
            if !(self.keep)(&row.state, self.direction) {
                continue;
            }
            match self.writable.project_row(&self.source, &row) {
                Ok(row) => chunk.push(row),
                Err(e) => return Some(Err(e.into())),
            }
            if chunk.len() == self.size {
                break;
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}

/// Everything a table apply needs, borrowed from the engine for one pass.
pub(crate) struct ApplyContext<'a, P: SyncProvider> {
    pub provider: &'a P,
    pub storage: &'a dyn BatchStorage,
    pub options: &'a SyncOptions,
    pub interceptors: &'a SyncInterceptors,
    pub args: ApplyArgs,
    pub cancelled: &'a AtomicBool,
}

impl<P: SyncProvider> ApplyContext<'_, P> {
    pub fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_transient(&self, error: &AdapterError) -> bool {
        self.provider.is_transient(error)
    }

    /// Prepares the single-row command and, when bulk execution is enabled
    /// and supported, its bulk variant.
    pub fn prepare(
        &self,
        writable: &SyncTable,
        direction: ChangeDirection,
        reinitialize: bool,
    ) -> SyncResult<TableCommands> {
        writable.validate()?;
        let command_type = CommandType::for_direction(direction, reinitialize);
        let single = self.provider.get_command(writable, command_type)?;
        let bulk = if self.options.use_bulk_operations && self.provider.supports_bulk_operations()
        {
            Some(self.provider.get_command(writable, command_type.bulk())?)
        } else {
            None
        };
        Ok(TableCommands { single, bulk })
    }

    /// Applies every part of `batch` holding rows of `table` in `direction`.
    ///
    /// Parts are streamed in chunks of `batch_size` rows. Counts are folded
    /// into `changes` part by part; failed rows are classified into `errors`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_table(
        &self,
        conn: &mut P::Connection,
        table: &SyncTable,
        batch: &BatchInfo,
        direction: ChangeDirection,
        reinitialize: bool,
        changes: &mut DatabaseChangesApplied,
        errors: &mut ErrorsTable,
    ) -> SyncResult<()> {
        let writable = table.writable();
        let commands = self
            .prepare(&writable, direction, reinitialize)
            .map_err(|e| with_context(e, table, direction, &batch.directory, None, None))?;

        for part in batch.parts_for(&table.name) {
            self.check_cancelled()?;
            let part_context =
                |e: SyncError| with_context(e, table, direction, &batch.directory, Some(part), None);
            let mut chunks = self
                .part_chunks(batch, part, &writable, direction, RowState::applies_to)
                .map_err(part_context)?;
            let first = match chunks.next() {
                Some(chunk) => chunk.map_err(part_context)?,
                None => continue,
            };

            debug!(
                table = %table.name,
                %direction,
                part = %part.file_name,
                rows = part.row_count,
                "applying batch part"
            );

            let part_changes = self
                .in_part_transaction(conn, |conn| {
                    let mut total = TableChangesApplied::new(writable.name.clone(), direction);
                    let mut next = Some(Ok(first));
                    while let Some(chunk) = next {
                        let chunk = chunk?;
                        self.interceptors
                            .rows_applying(&table.name, direction, chunk.len());
                        total.add(&self.apply_rows(
                            conn, &writable, direction, &commands, chunk, errors,
                        )?);
                        next = chunks.next();
                    }
                    Ok(total)
                })
                .map_err(|e| {
                    with_context(
                        e,
                        table,
                        direction,
                        &batch.directory,
                        Some(part),
                        Some(&commands.single),
                    )
                })?;

            self.interceptors.rows_applied(&part_changes);
            changes.entry(&table.name, direction).add(&part_changes);
        }
        Ok(())
    }

    /// Opens one part for chunked reading.
    ///
    /// Only rows whose state passes `keep` for `direction` are yielded, shaped
    /// by `writable`. Fails if the part header names another table than the
    /// descriptor.
    pub fn part_chunks<'t>(
        &self,
        batch: &BatchInfo,
        part: &BatchPartInfo,
        writable: &'t SyncTable,
        direction: ChangeDirection,
        keep: fn(&RowState, ChangeDirection) -> bool,
    ) -> SyncResult<PartChunks<'t>> {
        let reader = self.storage.open_part(&batch.directory, part)?;
        let source = reader.table().clone();
        if source.name != part.table {
            return Err(SyncError::invalid_batch(format!(
                "part {} holds rows of {}, descriptor says {}",
                part.file_name, source.name, part.table
            )));
        }
        Ok(PartChunks {
            reader,
            source,
            writable,
            direction,
            keep,
            size: self.options.batch_size.max(1),
        })
    }

    /// Runs `f` inside a transaction when the mode is per batch part.
    pub fn in_part_transaction<R>(
        &self,
        conn: &mut P::Connection,
        f: impl FnOnce(&mut P::Connection) -> SyncResult<R>,
    ) -> SyncResult<R> {
        if self.options.transaction_mode != TransactionMode::PerBatch {
            return f(conn);
        }
        self.provider.begin(conn)?;
        match f(conn) {
            Ok(result) => {
                self.provider.commit(conn)?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = self.provider.rollback(conn) {
                    warn!(error = %rollback, "rollback of batch part failed");
                }
                Err(e)
            }
        }
    }

    /// Applies rows already shaped by `writable`, resolving conflicts and
    /// classifying failures. Returns the counts for these rows.
    pub fn apply_rows(
        &self,
        conn: &mut P::Connection,
        writable: &SyncTable,
        direction: ChangeDirection,
        commands: &TableCommands,
        rows: Vec<SyncRow>,
        errors: &mut ErrorsTable,
    ) -> SyncResult<TableChangesApplied> {
        let mut changes = TableChangesApplied::new(writable.name.clone(), direction);
        let mut conflicts = Vec::new();
        let mut failed = Vec::new();

        for chunk in rows.chunks(self.options.batch_size.max(1)) {
            let bulk_result = match &commands.bulk {
                Some(bulk) => Some(
                    self.provider
                        .execute_bulk(conn, bulk, writable, chunk, &self.args),
                ),
                None => None,
            };
            match bulk_result {
                Some(Ok(rejected)) => {
                    changes.applied += chunk.len().saturating_sub(rejected.len()) as u64;
                    conflicts.extend(rejected);
                    continue;
                }
                Some(Err(e)) if self.is_transient(&e) => return Err(e.into()),
                Some(Err(e)) => {
                    debug!(
                        table = %writable.name,
                        rows = chunk.len(),
                        error = %e,
                        "bulk apply failed, falling back to single rows"
                    );
                }
                None => {}
            }
            for row in chunk {
                match self.execute_row(conn, &commands.single, writable, row)? {
                    RowOutcome::Applied => changes.applied += 1,
                    RowOutcome::Conflict => conflicts.push(row.clone()),
                    RowOutcome::Error(error) => failed.push(SyncRowError {
                        table: writable.name.clone(),
                        direction,
                        row: row.clone(),
                        error,
                    }),
                }
            }
        }

        for row in conflicts {
            let outcome = resolve_conflict(self, conn, writable, &commands.single, &row)?;
            if outcome.applied {
                changes.applied += 1;
            }
            if outcome.resolved {
                changes.resolved_conflicts += 1;
            }
            if let Some(error) = outcome.error {
                failed.push(SyncRowError {
                    table: writable.name.clone(),
                    direction,
                    row,
                    error,
                });
            }
        }

        handle_failed_rows(self, conn, writable, &commands.single, failed, &mut changes, errors)?;

        if changes.resolved_conflicts > 0 || changes.failed > 0 {
            warn!(
                table = %writable.name,
                %direction,
                applied = changes.applied,
                conflicts = changes.resolved_conflicts,
                failed = changes.failed,
                "rows applied with conflicts or failures"
            );
        }
        Ok(changes)
    }

    /// Executes one row with `command` and the pass arguments.
    ///
    /// Transient errors are returned as `Err`, so they abort the table.
    pub fn execute_row(
        &self,
        conn: &mut P::Connection,
        command: &SyncCommand,
        writable: &SyncTable,
        row: &SyncRow,
    ) -> SyncResult<RowOutcome> {
        match self
            .provider
            .execute_single(conn, command, writable, row, &self.args)
        {
            Ok(0) => Ok(RowOutcome::Conflict),
            Ok(_) => Ok(RowOutcome::Applied),
            Err(e) if self.is_transient(&e) => Err(e.into()),
            Err(e) => Ok(RowOutcome::Error(e)),
        }
    }
}

/// Attaches table, file and command context to structural errors.
///
/// Errors that already describe their cause at pass level pass through.
pub(crate) fn with_context(
    error: SyncError,
    table: &SyncTable,
    direction: ChangeDirection,
    directory: &Path,
    part: Option<&BatchPartInfo>,
    command: Option<&SyncCommand>,
) -> SyncError {
    match error {
        SyncError::Storage(_)
        | SyncError::Model(_)
        | SyncError::Adapter(_)
        | SyncError::InvalidBatch(_) => SyncError::ApplyFailed {
            table: table.name.clone(),
            direction,
            directory: directory.to_path_buf(),
            file: part.map(|p| p.file_name.clone()),
            command: command.map(|c| c.command_type),
            command_text: command.map(|c| c.text.clone()),
            source: Box::new(error),
        },
        other => other,
    }
}
