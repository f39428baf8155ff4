//! Sync-pass orchestrator.
//!
//! One pass walks `ReplayErrors -> ApplyIncoming -> UpdateScope ->
//! PersistErrors -> Done`; any unrecovered error moves it to `Failed` and
//! leaves the stored scope record untouched, so the next pass recomputes
//! the same change window.

use crate::config::{SyncOptions, TransactionMode};
use crate::error::{SyncError, SyncResult};
use crate::errors::ErrorsTable;
use crate::executor::{with_context, ApplyContext};
use crate::interceptors::{RetryAttempt, SyncInterceptors};
use crate::provider::{ApplyArgs, SyncProvider};
use parking_lot::RwLock;
use rowsync_model::{
    BatchInfo, ChangeDirection, DatabaseChangesApplied, RowKey, RowState, ScopeInfoClient,
    SyncSet, SyncTable, TableChangesApplied, TableName,
};
use rowsync_storage::BatchStorage;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The step a pass is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPassState {
    /// No pass has run yet.
    Idle,
    /// Replaying the error batch of the previous pass.
    ReplayErrors,
    /// Applying the incoming batch.
    ApplyIncoming,
    /// Computing the next scope record.
    UpdateScope,
    /// Writing the error batch and saving the scope record.
    PersistErrors,
    /// The last pass succeeded.
    Done,
    /// The last pass failed.
    Failed,
}

impl SyncPassState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPassState::ReplayErrors
                | SyncPassState::ApplyIncoming
                | SyncPassState::UpdateScope
                | SyncPassState::PersistErrors
        )
    }

    /// Returns true if a new pass can start.
    pub fn can_start_pass(&self) -> bool {
        matches!(
            self,
            SyncPassState::Idle | SyncPassState::Done | SyncPassState::Failed
        )
    }
}

impl fmt::Display for SyncPassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Statistics accumulated over the passes of one engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that completed.
    pub passes_completed: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Rows written.
    pub rows_applied: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Rows that could not be applied.
    pub rows_failed: u64,
    /// Transient retries.
    pub retries: u64,
    /// Incoming batches skipped because they were already applied.
    pub stale_batches_skipped: u64,
    /// Duration of the last successful pass.
    pub last_pass_duration: Option<Duration>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Input of one pass.
#[derive(Debug, Clone)]
pub struct ApplyChangesRequest {
    /// Scope the pass runs for.
    pub scope_name: String,
    /// Tables and relations of the scope.
    pub schema: SyncSet,
    /// The incoming batch.
    pub batch: BatchInfo,
    /// The target is being initialized from scratch: rows are inserted and
    /// deletes are skipped.
    pub reinitialize: bool,
    /// Local timestamp to record as the new `last_sync_timestamp`. Captured
    /// from the provider at pass start when absent.
    pub captured_timestamp: Option<u64>,
}

impl ApplyChangesRequest {
    /// Creates a request for an incremental pass.
    pub fn new(scope_name: impl Into<String>, schema: SyncSet, batch: BatchInfo) -> Self {
        Self {
            scope_name: scope_name.into(),
            schema,
            batch,
            reinitialize: false,
            captured_timestamp: None,
        }
    }

    /// Marks the target as being initialized from scratch.
    pub fn with_reinitialize(mut self, reinitialize: bool) -> Self {
        self.reinitialize = reinitialize;
        self
    }

    /// Supplies the timestamp captured before the batch was selected.
    pub fn with_captured_timestamp(mut self, timestamp: u64) -> Self {
        self.captured_timestamp = Some(timestamp);
        self
    }
}

/// Output of a successful pass.
#[derive(Debug, Clone)]
pub struct ApplyChangesResult {
    /// Per-table counts, including replayed errors.
    pub changes: DatabaseChangesApplied,
    /// The scope record saved by the pass.
    pub scope: ScopeInfoClient,
    /// Rows left in the error batch.
    pub errors_remaining: usize,
    /// True if the incoming batch was already applied and was skipped.
    pub skipped_stale_batch: bool,
    /// Attempts made, including transient retries.
    pub attempts: u32,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// Cancels the passes of an engine from another thread or callback.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation of the running pass.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct PassOutcome {
    changes: DatabaseChangesApplied,
    scope: ScopeInfoClient,
    previous_errors: Option<BatchInfo>,
    errors_remaining: usize,
    incoming_failed: u64,
    skipped: bool,
}

#[derive(Default)]
struct ReplayTally {
    replayed: usize,
    reconciled: usize,
    carried: usize,
}

/// Applies change batches to a target store.
///
/// # Example
///
/// ```rust
/// use rowsync_engine::{ApplyChangesRequest, MemoryProvider, SyncEngine, SyncOptions};
/// use rowsync_model::{BatchInfo, DataType, SyncColumn, SyncRow, SyncSet, SyncTable, TableName};
/// use rowsync_storage::{BatchWriter, InMemoryBatchStorage};
/// use std::sync::Arc;
///
/// let customer = SyncTable::new(TableName::new("Customer"))
///     .with_column(SyncColumn::new("id", DataType::Integer))
///     .with_primary_keys(["id"]);
/// let schema = SyncSet::new().with_table(customer.clone());
///
/// let storage = Arc::new(InMemoryBatchStorage::new());
/// let mut writer = BatchWriter::new(storage.as_ref(), BatchInfo::new("in"), 100);
/// writer.write_table(&customer, vec![SyncRow::modified(vec![1i64.into()])]).unwrap();
/// let batch = writer.finish();
///
/// let engine = SyncEngine::new(MemoryProvider::new(&schema), storage, SyncOptions::default());
/// let result = engine
///     .apply_changes(&ApplyChangesRequest::new("default", schema, batch))
///     .unwrap();
/// assert_eq!(result.changes.total_applied(), 1);
/// ```
pub struct SyncEngine<P: SyncProvider> {
    provider: Arc<P>,
    storage: Arc<dyn BatchStorage>,
    options: SyncOptions,
    interceptors: SyncInterceptors,
    state: RwLock<SyncPassState>,
    stats: RwLock<SyncStats>,
    cancelled: Arc<AtomicBool>,
}

impl<P: SyncProvider> SyncEngine<P> {
    /// Creates an engine.
    pub fn new(provider: P, storage: Arc<dyn BatchStorage>, options: SyncOptions) -> Self {
        Self {
            provider: Arc::new(provider),
            storage,
            options,
            interceptors: SyncInterceptors::default(),
            state: RwLock::new(SyncPassState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs callbacks.
    pub fn with_interceptors(mut self, interceptors: SyncInterceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Returns the provider.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Returns the options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncPassState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels the running pass.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns a handle that cancels the running pass.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    /// Loads the committed scope record, or a fresh one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails.
    pub fn load_scope(&self, name: &str) -> SyncResult<ScopeInfoClient> {
        let mut conn = self.provider.open()?;
        Ok(self
            .provider
            .load_scope(&mut conn, name)?
            .unwrap_or_else(|| ScopeInfoClient::new(name)))
    }

    fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncPassState) {
        debug!(%state, "sync pass state");
        *self.state.write() = state;
    }

    fn begin_pass(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start_pass() {
            return Err(SyncError::InvalidStateTransition {
                from: state.to_string(),
                to: SyncPassState::ReplayErrors.to_string(),
            });
        }
        *state = SyncPassState::ReplayErrors;
        Ok(())
    }

    fn should_retry(&self, error: &SyncError) -> bool {
        self.options.transaction_mode == TransactionMode::AllOrNothing
            && error.is_transient_with(&|e| self.provider.is_transient(e))
    }

    /// Runs one sync pass.
    ///
    /// Under [`TransactionMode::AllOrNothing`] the whole pass is one
    /// transaction and transient failures restart it with linear backoff.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the pass. The stored scope record is
    /// unchanged when this returns an error.
    pub fn apply_changes(&self, request: &ApplyChangesRequest) -> SyncResult<ApplyChangesResult> {
        let start = Instant::now();
        self.begin_pass()?;
        self.reset_cancel();

        info!(
            scope = %request.scope_name,
            parts = request.batch.parts.len(),
            rows = request.batch.row_count(),
            mode = ?self.options.transaction_mode,
            "sync pass starting"
        );

        let mut attempts = 0u32;
        let outcome = loop {
            attempts += 1;
            match self.run_attempt(request, start) {
                Ok(outcome) => break Ok(outcome),
                Err(e) if self.should_retry(&e) => {
                    if !self.options.retry.allows_another(attempts) {
                        break Err(SyncError::RetriesExhausted {
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    if let Err(cancelled) = self.check_cancelled() {
                        break Err(cancelled);
                    }
                    let delay = self.options.retry.delay_for_attempt(attempts);
                    warn!(
                        scope = %request.scope_name,
                        attempt = attempts,
                        ?delay,
                        error = %e,
                        "transient failure, retrying sync pass"
                    );
                    self.interceptors.notify_retry(&RetryAttempt {
                        attempt: attempts,
                        delay,
                        error: e.to_string(),
                    });
                    self.stats.write().retries += 1;
                    thread::sleep(delay);
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(outcome) => {
                self.clean_up(request, &outcome);
                let duration = start.elapsed();
                {
                    let mut stats = self.stats.write();
                    stats.passes_completed += 1;
                    stats.rows_applied += outcome.changes.total_applied();
                    stats.conflicts_resolved += outcome.changes.total_resolved_conflicts();
                    stats.rows_failed += outcome.changes.total_failed();
                    if outcome.skipped {
                        stats.stale_batches_skipped += 1;
                    }
                    stats.last_pass_duration = Some(duration);
                }
                info!(
                    scope = %request.scope_name,
                    applied = outcome.changes.total_applied(),
                    conflicts = outcome.changes.total_resolved_conflicts(),
                    failed = outcome.changes.total_failed(),
                    errors_remaining = outcome.errors_remaining,
                    duration_ms = duration.as_millis() as u64,
                    "sync pass completed"
                );
                self.set_state(SyncPassState::Done);
                Ok(ApplyChangesResult {
                    changes: outcome.changes,
                    scope: outcome.scope,
                    errors_remaining: outcome.errors_remaining,
                    skipped_stale_batch: outcome.skipped,
                    attempts,
                    duration,
                })
            }
            Err(e) => {
                warn!(scope = %request.scope_name, error = %e, "sync pass failed");
                {
                    let mut stats = self.stats.write();
                    stats.passes_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.set_state(SyncPassState::Failed);
                Err(e)
            }
        }
    }

    /// One attempt: opens a connection, runs the steps, commits or rolls back.
    fn run_attempt(&self, request: &ApplyChangesRequest, start: Instant) -> SyncResult<PassOutcome> {
        let provider = self.provider.as_ref();
        let mut conn = provider.open()?;
        let whole_pass = self.options.transaction_mode == TransactionMode::AllOrNothing;
        if whole_pass {
            provider.begin(&mut conn)?;
        }

        let mut written: Option<BatchInfo> = None;
        let result = self
            .run_steps(&mut conn, request, start, &mut written)
            .and_then(|outcome| {
                if whole_pass {
                    provider.commit(&mut conn)?;
                }
                Ok(outcome)
            });

        if result.is_err() {
            if whole_pass {
                if let Err(e) = provider.rollback(&mut conn) {
                    debug!(error = %e, "rollback after failed attempt");
                }
            }
            if let Some(batch) = written {
                if let Err(e) = self.storage.delete_batch(&batch.directory) {
                    warn!(
                        directory = %batch.directory.display(),
                        error = %e,
                        "failed to delete orphaned error batch"
                    );
                }
            }
        }
        result
    }

    fn run_steps(
        &self,
        conn: &mut P::Connection,
        request: &ApplyChangesRequest,
        start: Instant,
        written: &mut Option<BatchInfo>,
    ) -> SyncResult<PassOutcome> {
        let provider = self.provider.as_ref();
        let schema = &request.schema;
        schema.validate()?;
        validate_batch(schema, &request.batch)?;

        let scope = provider
            .load_scope(conn, &request.scope_name)?
            .unwrap_or_else(|| ScopeInfoClient::new(&request.scope_name));
        let captured = match request.captured_timestamp {
            Some(timestamp) => timestamp,
            None => provider.current_timestamp(conn)?,
        };
        let skipped = is_stale(&request.batch, &scope);

        let ctx = ApplyContext {
            provider,
            storage: self.storage.as_ref(),
            options: &self.options,
            interceptors: &self.interceptors,
            args: ApplyArgs {
                scope_id: scope.id,
                last_timestamp: scope.last_sync_timestamp,
                force_write: false,
            },
            cancelled: &self.cancelled,
        };
        let mut changes = DatabaseChangesApplied::new();
        let mut errors = ErrorsTable::new();

        self.set_state(SyncPassState::ReplayErrors);
        if let Some(previous) = scope.errors.as_ref().filter(|b| !b.is_empty()) {
            let reconcile_with = (!skipped).then_some(&request.batch);
            self.replay_errors(
                &ctx,
                conn,
                schema,
                previous,
                reconcile_with,
                &mut changes,
                &mut errors,
            )?;
        }

        self.set_state(SyncPassState::ApplyIncoming);
        let mut incoming = DatabaseChangesApplied::new();
        if skipped {
            info!(
                scope = %scope.name,
                batch_timestamp = ?request.batch.timestamp,
                last_server_sync_timestamp = ?scope.last_server_sync_timestamp,
                "incoming batch already applied, skipping"
            );
        } else {
            self.apply_incoming(&ctx, conn, request, &mut incoming, &mut errors)?;
        }
        changes.merge(&incoming);

        self.set_state(SyncPassState::UpdateScope);
        let remote_timestamp = if skipped { None } else { request.batch.timestamp };
        let advanced = scope.advanced(captured, remote_timestamp, start.elapsed());

        self.set_state(SyncPassState::PersistErrors);
        ctx.check_cancelled()?;
        let error_batch = if errors.is_empty() {
            None
        } else {
            let directory = self.options.errors_directory.join(format!(
                "{}_{}",
                sanitize(&scope.name),
                Uuid::new_v4().simple()
            ));
            let batch =
                errors.write_batch(self.storage.as_ref(), directory, self.options.max_rows_per_part)?;
            debug!(
                directory = %batch.directory.display(),
                rows = errors.len(),
                retries = errors.retry_count(),
                "error batch written"
            );
            *written = Some(batch.clone());
            Some(batch)
        };
        let next = advanced.with_errors(error_batch);
        ctx.in_part_transaction(conn, |conn| Ok(provider.save_scope(conn, &next)?))?;

        Ok(PassOutcome {
            changes,
            scope: next,
            previous_errors: scope.errors,
            errors_remaining: errors.len(),
            incoming_failed: incoming.total_failed(),
            skipped,
        })
    }

    /// Replays the previous error batch.
    ///
    /// Rows whose key also appears in `reconcile_with` are dropped: the
    /// incoming batch carries a newer version. Terminal failures are carried
    /// into the new errors table without being applied. Parts are streamed
    /// once per direction, upserts first.
    #[allow(clippy::too_many_arguments)]
    fn replay_errors(
        &self,
        ctx: &ApplyContext<'_, P>,
        conn: &mut P::Connection,
        schema: &SyncSet,
        previous: &BatchInfo,
        reconcile_with: Option<&BatchInfo>,
        changes: &mut DatabaseChangesApplied,
        errors: &mut ErrorsTable,
    ) -> SyncResult<()> {
        let mut incoming_keys: HashMap<&TableName, HashSet<RowKey>> = HashMap::new();
        for table_name in previous.tables() {
            let Some(table) = schema.table(table_name) else {
                warn!(table = %table_name, "error batch holds rows of a table outside the scope, dropping them");
                continue;
            };
            if let Some(batch) = reconcile_with {
                incoming_keys.insert(&table.name, self.batch_keys(batch, table)?);
            }
        }

        let mut tally = ReplayTally::default();
        for direction in [ChangeDirection::Modified, ChangeDirection::Deleted] {
            let order = match direction {
                ChangeDirection::Modified => schema.upsert_order(),
                ChangeDirection::Deleted => schema.delete_order(),
            };
            for table in order {
                if previous.parts_for(&table.name).next().is_none() {
                    continue;
                }
                let writable = table.writable();
                let keys = incoming_keys.get(&table.name);
                let commands = ctx.prepare(&writable, direction, false).map_err(|e| {
                    with_context(e, table, direction, &previous.directory, None, None)
                })?;

                for part in previous.parts_for(&table.name) {
                    ctx.check_cancelled()?;
                    let part_context = |e: SyncError| {
                        with_context(e, table, direction, &previous.directory, Some(part), None)
                    };
                    let mut chunks = ctx
                        .part_chunks(previous, part, &writable, direction, replays_in)
                        .map_err(part_context)?;
                    let first = match chunks.next() {
                        Some(chunk) => chunk.map_err(part_context)?,
                        None => continue,
                    };

                    let part_changes = ctx
                        .in_part_transaction(conn, |conn| {
                            let mut total =
                                TableChangesApplied::new(writable.name.clone(), direction);
                            let mut next = Some(Ok(first));
                            while let Some(chunk) = next {
                                let mut pending = Vec::new();
                                for row in chunk? {
                                    let key = row.key(&writable)?;
                                    if keys.is_some_and(|k| k.contains(&key)) {
                                        tally.reconciled += 1;
                                    } else if row.state.is_retry() || row.state.is_fresh() {
                                        pending.push(row);
                                    } else {
                                        tally.carried += 1;
                                        errors.record(
                                            &writable,
                                            row,
                                            "carried over from previous pass",
                                        )?;
                                    }
                                }
                                if !pending.is_empty() {
                                    tally.replayed += pending.len();
                                    ctx.interceptors.rows_applying(
                                        &table.name,
                                        direction,
                                        pending.len(),
                                    );
                                    total.add(&ctx.apply_rows(
                                        conn, &writable, direction, &commands, pending, errors,
                                    )?);
                                }
                                next = chunks.next();
                            }
                            Ok(total)
                        })
                        .map_err(|e| {
                            with_context(
                                e,
                                table,
                                direction,
                                &previous.directory,
                                Some(part),
                                Some(&commands.single),
                            )
                        })?;

                    if !part_changes.is_empty() {
                        ctx.interceptors.rows_applied(&part_changes);
                        changes.entry(&table.name, direction).add(&part_changes);
                    }
                }
            }
        }

        info!(
            replayed = tally.replayed,
            reconciled = tally.reconciled,
            carried = tally.carried,
            "previous errors replayed"
        );
        Ok(())
    }

    /// Primary keys of the rows `batch` carries for `table`.
    fn batch_keys(&self, batch: &BatchInfo, table: &SyncTable) -> SyncResult<HashSet<RowKey>> {
        let mut keys = HashSet::new();
        for part in batch.parts_for(&table.name) {
            let reader = self.storage.open_part(&batch.directory, part).map_err(|e| {
                with_context(
                    e.into(),
                    table,
                    ChangeDirection::Modified,
                    &batch.directory,
                    Some(part),
                    None,
                )
            })?;
            let source = reader.table().clone();
            for row in reader {
                let row = row?;
                keys.insert(row.key(&source)?);
            }
        }
        Ok(keys)
    }

    /// Applies upserts in dependency order, then deletes in reverse order.
    fn apply_incoming(
        &self,
        ctx: &ApplyContext<'_, P>,
        conn: &mut P::Connection,
        request: &ApplyChangesRequest,
        changes: &mut DatabaseChangesApplied,
        errors: &mut ErrorsTable,
    ) -> SyncResult<()> {
        if request.batch.parts.is_empty() {
            return Ok(());
        }
        let disable = self.options.disable_constraints_on_apply;
        if disable {
            self.provider.disable_constraints(conn)?;
        }
        let result = self.apply_directions(ctx, conn, request, changes, errors);
        if disable {
            let enabled = self.provider.enable_constraints(conn);
            result?;
            enabled?;
            return Ok(());
        }
        result
    }

    fn apply_directions(
        &self,
        ctx: &ApplyContext<'_, P>,
        conn: &mut P::Connection,
        request: &ApplyChangesRequest,
        changes: &mut DatabaseChangesApplied,
        errors: &mut ErrorsTable,
    ) -> SyncResult<()> {
        let batch = &request.batch;
        let mut directions = vec![ChangeDirection::Modified];
        if !request.reinitialize {
            directions.push(ChangeDirection::Deleted);
        }
        for direction in directions {
            let order = match direction {
                ChangeDirection::Modified => request.schema.upsert_order(),
                ChangeDirection::Deleted => request.schema.delete_order(),
            };
            for table in order {
                if batch.parts_for(&table.name).next().is_none() {
                    continue;
                }
                ctx.check_cancelled()?;
                ctx.apply_table(
                    conn,
                    table,
                    batch,
                    direction,
                    request.reinitialize,
                    changes,
                    errors,
                )?;
            }
        }
        Ok(())
    }

    /// Deletes batches that are no longer needed once a pass has committed.
    ///
    /// Failures are logged; the pass has already succeeded.
    fn clean_up(&self, request: &ApplyChangesRequest, outcome: &PassOutcome) {
        if let Some(previous) = &outcome.previous_errors {
            let still_referenced = outcome
                .scope
                .errors
                .as_ref()
                .is_some_and(|current| current.directory == previous.directory);
            if !still_referenced {
                self.delete_batch(previous);
            }
        }
        if self.options.clean_folder
            && outcome.incoming_failed == 0
            && !request.batch.parts.is_empty()
        {
            self.delete_batch(&request.batch);
        }
    }

    fn delete_batch(&self, batch: &BatchInfo) {
        if let Err(e) = self.storage.delete_batch(&batch.directory) {
            warn!(directory = %batch.directory.display(), error = %e, "failed to delete batch");
        }
    }
}

/// Error rows read while replaying in `direction`: rows of that direction,
/// plus direction-less log rows on the upsert walk.
fn replays_in(state: &RowState, direction: ChangeDirection) -> bool {
    match state.direction() {
        Some(d) => d == direction,
        None => direction == ChangeDirection::Modified,
    }
}

/// Checks the batch descriptor against itself and the schema.
fn validate_batch(schema: &SyncSet, batch: &BatchInfo) -> SyncResult<()> {
    if !batch.is_well_formed() {
        return Err(SyncError::invalid_batch(format!(
            "batch {} has out-of-order parts or a misplaced last-part flag",
            batch.directory.display()
        )));
    }
    if let Some(unknown) = batch.tables().into_iter().find(|t| schema.table(t).is_none()) {
        return Err(SyncError::invalid_batch(format!(
            "batch {} holds rows of {unknown}, which is not part of the scope",
            batch.directory.display()
        )));
    }
    Ok(())
}

/// A batch selected at or before the last acknowledged remote timestamp was
/// already applied.
fn is_stale(batch: &BatchInfo, scope: &ScopeInfoClient) -> bool {
    matches!(
        (batch.timestamp, scope.last_server_sync_timestamp),
        (Some(batch_ts), Some(acknowledged)) if batch_ts <= acknowledged
    )
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_model::{DataType, SyncColumn};

    #[test]
    fn pass_state_checks() {
        assert!(SyncPassState::Idle.can_start_pass());
        assert!(SyncPassState::Done.can_start_pass());
        assert!(SyncPassState::Failed.can_start_pass());
        assert!(!SyncPassState::ApplyIncoming.can_start_pass());

        assert!(SyncPassState::ReplayErrors.is_active());
        assert!(SyncPassState::PersistErrors.is_active());
        assert!(!SyncPassState::Done.is_active());
    }

    #[test]
    fn stale_batches() {
        let mut scope = ScopeInfoClient::new("s");
        let batch = BatchInfo::new("b").with_timestamp(10);
        assert!(!is_stale(&batch, &scope));

        scope.last_server_sync_timestamp = Some(10);
        assert!(is_stale(&batch, &scope));

        scope.last_server_sync_timestamp = Some(9);
        assert!(!is_stale(&batch, &scope));
        assert!(!is_stale(&BatchInfo::new("b"), &scope));
    }

    #[test]
    fn batch_validation() {
        let table = SyncTable::new(TableName::new("A"))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_primary_keys(["id"]);
        let schema = SyncSet::new().with_table(table);

        let mut batch = BatchInfo::new("b");
        batch.add_part(TableName::new("A"), 1);
        assert!(validate_batch(&schema, &batch).is_ok());

        batch.add_part(TableName::new("Unknown"), 1);
        assert!(matches!(
            validate_batch(&schema, &batch),
            Err(SyncError::InvalidBatch(_))
        ));
    }

    #[test]
    fn cancel_handle_shares_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let handle = CancelHandle(Arc::clone(&flag));
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn replay_walks() {
        assert!(replays_in(&RowState::RetryDeletedOnNextSync, ChangeDirection::Deleted));
        assert!(replays_in(&RowState::ApplyModifiedFailed, ChangeDirection::Modified));
        assert!(!replays_in(&RowState::ApplyModifiedFailed, ChangeDirection::Deleted));
        assert!(replays_in(&RowState::None, ChangeDirection::Modified));
        assert!(!replays_in(&RowState::None, ChangeDirection::Deleted));
    }

    #[test]
    fn sanitized_directory_names() {
        assert_eq!(sanitize("my scope/1"), "my_scope_1");
    }
}
