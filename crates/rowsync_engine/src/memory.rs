//! In-memory, change-tracked store implementing [`SyncProvider`].
//!
//! Every row carries the timestamp of its last write and the scope that
//! made it, which is what the version check of update and delete commands
//! compares against. Deleted rows leave a tombstone.
//!
//! Transactions are snapshots: `begin` copies the committed state into the
//! connection, `commit` swaps the copy back in. Concurrent writers are not
//! isolated from each other; the last commit wins.

use crate::error::{AdapterError, AdapterResult};
use crate::provider::{ApplyArgs, CommandType, SyncCommand, SyncProvider};
use parking_lot::RwLock;
use rowsync_model::{
    ChangeDirection, RowKey, ScopeInfoClient, SyncRelation, SyncRow, SyncSet, SyncTable,
    TableName, Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Kind of a logged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Insert or update.
    Upsert,
    /// Delete.
    Delete,
}

/// One committed write, in commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Table written.
    pub table: TableName,
    /// Kind of write.
    pub kind: WriteKind,
    /// Primary key of the row.
    pub key: Vec<Value>,
    /// Scope that made the write; `None` for local application writes.
    pub scope_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct TrackedRow {
    /// `None` is a tombstone.
    values: Option<Vec<Value>>,
    timestamp: u64,
    update_scope_id: Option<Uuid>,
}

impl TrackedRow {
    fn is_live(&self) -> bool {
        self.values.is_some()
    }

    fn may_overwrite(&self, args: &ApplyArgs) -> bool {
        args.force_write
            || self.update_scope_id == Some(args.scope_id)
            || args.last_timestamp.is_some_and(|ts| self.timestamp <= ts)
    }
}

#[derive(Debug, Clone)]
struct TableData {
    schema: SyncTable,
    rows: BTreeMap<RowKey, TrackedRow>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    tables: BTreeMap<TableName, TableData>,
    relations: Vec<SyncRelation>,
    scopes: HashMap<String, ScopeInfoClient>,
    log: Vec<WriteRecord>,
}

/// Connection to a [`MemoryProvider`].
#[derive(Debug)]
pub struct MemoryConnection {
    transaction: Option<StoreState>,
    constraints_enabled: bool,
}

impl MemoryConnection {
    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[derive(Debug)]
struct Shared {
    state: RwLock<StoreState>,
    clock: AtomicU64,
    pending_failures: AtomicU32,
    transactions: AtomicU64,
    bulk_calls: AtomicU64,
}

/// In-memory store used for tests and embedding.
///
/// Enforces column types, NOT NULL, and foreign keys (the latter can be
/// disabled per connection). Transient failures can be injected with
/// [`MemoryProvider::fail_next`].
///
/// # Example
///
/// ```rust
/// use rowsync_engine::MemoryProvider;
/// use rowsync_model::{DataType, SyncColumn, SyncSet, SyncTable, TableName};
///
/// let customer = SyncTable::new(TableName::new("Customer"))
///     .with_column(SyncColumn::new("id", DataType::Integer))
///     .with_primary_keys(["id"]);
/// let provider = MemoryProvider::new(&SyncSet::new().with_table(customer));
///
/// provider.local_upsert(&TableName::new("Customer"), vec![1i64.into()]).unwrap();
/// assert_eq!(provider.row_count(&TableName::new("Customer")), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    shared: Arc<Shared>,
}

impl MemoryProvider {
    /// Creates a store provisioned with the tables and relations of `schema`.
    pub fn new(schema: &SyncSet) -> Self {
        let tables = schema
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    TableData {
                        schema: t.clone(),
                        rows: BTreeMap::new(),
                    },
                )
            })
            .collect();
        let state = StoreState {
            tables,
            relations: schema.relations.clone(),
            ..StoreState::default()
        };
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                clock: AtomicU64::new(0),
                pending_failures: AtomicU32::new(0),
                transactions: AtomicU64::new(0),
                bulk_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Makes the next `count` execute calls fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.shared.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of transactions begun so far.
    pub fn transactions_begun(&self) -> u64 {
        self.shared.transactions.load(Ordering::SeqCst)
    }

    /// Number of bulk executions so far.
    pub fn bulk_calls(&self) -> u64 {
        self.shared.bulk_calls.load(Ordering::SeqCst)
    }

    /// Current store timestamp.
    pub fn timestamp(&self) -> u64 {
        self.shared.clock.load(Ordering::SeqCst)
    }

    /// Moves the clock forward to `timestamp`. Never moves it back.
    pub fn advance_clock(&self, timestamp: u64) {
        self.shared.clock.fetch_max(timestamp, Ordering::SeqCst);
    }

    /// Writes a row as the local application would, outside of any scope.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables, malformed rows and constraint violations.
    pub fn local_upsert(&self, table: &TableName, values: Vec<Value>) -> AdapterResult<()> {
        let timestamp = self.tick();
        let mut state = self.shared.state.write();
        let schema = state.schema(table)?.clone();
        let row = SyncRow::modified(values);
        state.upsert(&schema, &row, timestamp, None, true)
    }

    /// Deletes a row as the local application would.
    ///
    /// Returns false if no live row had that key.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables, malformed keys and constraint violations.
    pub fn local_delete(&self, table: &TableName, key: &[Value]) -> AdapterResult<bool> {
        let timestamp = self.tick();
        let mut state = self.shared.state.write();
        let row_key = RowKey::from_values(key);
        let live = state
            .data(table)?
            .rows
            .get(&row_key)
            .map(|r| r.is_live())
            .unwrap_or(false);
        if !live {
            return Ok(false);
        }
        state.delete(table, &row_key, timestamp, None, true)?;
        Ok(true)
    }

    /// Returns the committed values of a live row.
    pub fn get(&self, table: &TableName, key: &[Value]) -> Option<Vec<Value>> {
        self.shared
            .state
            .read()
            .tables
            .get(table)?
            .rows
            .get(&RowKey::from_values(key))?
            .values
            .clone()
    }

    /// Returns true if a tombstone is recorded for the key.
    pub fn is_tombstone(&self, table: &TableName, key: &[Value]) -> bool {
        self.shared
            .state
            .read()
            .tables
            .get(table)
            .and_then(|t| t.rows.get(&RowKey::from_values(key)))
            .map(|r| !r.is_live())
            .unwrap_or(false)
    }

    /// Number of committed live rows in a table.
    pub fn row_count(&self, table: &TableName) -> usize {
        self.shared
            .state
            .read()
            .tables
            .get(table)
            .map(|t| t.rows.values().filter(|r| r.is_live()).count())
            .unwrap_or(0)
    }

    /// Committed scope record.
    pub fn scope(&self, name: &str) -> Option<ScopeInfoClient> {
        self.shared.state.read().scopes.get(name).cloned()
    }

    /// Stores a scope record directly.
    pub fn put_scope(&self, scope: ScopeInfoClient) {
        self.shared
            .state
            .write()
            .scopes
            .insert(scope.name.clone(), scope);
    }

    /// Committed writes, in order.
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.shared.state.read().log.clone()
    }

    fn tick(&self) -> u64 {
        self.shared.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_injected_failure(&self) -> AdapterResult<()> {
        let taken = self
            .shared
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            Err(AdapterError::transient("injected transient failure"))
        } else {
            Ok(())
        }
    }

    fn with_state<R>(
        &self,
        conn: &mut MemoryConnection,
        f: impl FnOnce(&mut StoreState) -> AdapterResult<R>,
    ) -> AdapterResult<R> {
        match conn.transaction.as_mut() {
            Some(state) => f(state),
            None => f(&mut self.shared.state.write()),
        }
    }

    fn apply_row(
        &self,
        state: &mut StoreState,
        command: &SyncCommand,
        table: &SyncTable,
        row: &SyncRow,
        args: &ApplyArgs,
        constraints: bool,
    ) -> AdapterResult<u64> {
        let key = row
            .key(table)
            .map_err(|e| AdapterError::InvalidRow(e.to_string()))?;
        let existing = state.data(&table.name)?.rows.get(&key).cloned();

        match command.command_type.direction() {
            ChangeDirection::Modified => {
                let allowed = match (&existing, command.command_type.single()) {
                    (None, _) => true,
                    (Some(local), CommandType::InsertRow) => {
                        !local.is_live() || args.force_write
                    }
                    (Some(local), _) => local.may_overwrite(args),
                };
                if !allowed {
                    return Ok(0);
                }
                let full = state.data(&table.name)?.widen(table, row, existing.as_ref())?;
                state.upsert_full(&table.name, key, full, self.tick(), Some(args.scope_id), constraints)?;
                Ok(1)
            }
            ChangeDirection::Deleted => match existing {
                Some(local) if local.is_live() && local.may_overwrite(args) => {
                    state.delete(&table.name, &key, self.tick(), Some(args.scope_id), constraints)?;
                    Ok(1)
                }
                _ => Ok(0),
            },
        }
    }
}

impl StoreState {
    fn data(&self, table: &TableName) -> AdapterResult<&TableData> {
        self.tables
            .get(table)
            .ok_or_else(|| AdapterError::UnknownTable(table.clone()))
    }

    fn data_mut(&mut self, table: &TableName) -> AdapterResult<&mut TableData> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| AdapterError::UnknownTable(table.clone()))
    }

    fn schema(&self, table: &TableName) -> AdapterResult<&SyncTable> {
        self.data(table).map(|d| &d.schema)
    }

    /// Upserts a row shaped by the store's own schema.
    fn upsert(
        &mut self,
        schema: &SyncTable,
        row: &SyncRow,
        timestamp: u64,
        scope_id: Option<Uuid>,
        constraints: bool,
    ) -> AdapterResult<()> {
        let key = row
            .key(schema)
            .map_err(|e| AdapterError::InvalidRow(e.to_string()))?;
        self.upsert_full(&schema.name, key, row.values.clone(), timestamp, scope_id, constraints)
    }

    fn upsert_full(
        &mut self,
        table: &TableName,
        key: RowKey,
        values: Vec<Value>,
        timestamp: u64,
        scope_id: Option<Uuid>,
        constraints: bool,
    ) -> AdapterResult<()> {
        let schema = self.schema(table)?.clone();
        check_columns(&schema, &values)?;
        if constraints {
            self.check_parents_exist(&schema, &values)?;
        }
        let key_values = key_values(&schema, &values)?;
        self.data_mut(table)?.rows.insert(
            key,
            TrackedRow {
                values: Some(values),
                timestamp,
                update_scope_id: scope_id,
            },
        );
        self.log.push(WriteRecord {
            table: table.clone(),
            kind: WriteKind::Upsert,
            key: key_values,
            scope_id,
        });
        Ok(())
    }

    fn delete(
        &mut self,
        table: &TableName,
        key: &RowKey,
        timestamp: u64,
        scope_id: Option<Uuid>,
        constraints: bool,
    ) -> AdapterResult<()> {
        let schema = self.schema(table)?.clone();
        let Some(values) = self
            .data(table)?
            .rows
            .get(key)
            .and_then(|r| r.values.clone())
        else {
            return Ok(());
        };
        if constraints {
            self.check_no_children(&schema, &values)?;
        }
        let key_values = key_values(&schema, &values)?;
        self.data_mut(table)?.rows.insert(
            key.clone(),
            TrackedRow {
                values: None,
                timestamp,
                update_scope_id: scope_id,
            },
        );
        self.log.push(WriteRecord {
            table: table.clone(),
            kind: WriteKind::Delete,
            key: key_values,
            scope_id,
        });
        Ok(())
    }

    fn check_parents_exist(&self, schema: &SyncTable, values: &[Value]) -> AdapterResult<()> {
        for relation in self.relations.iter().filter(|r| r.child_table == schema.name) {
            let Some(child_values) = column_values(schema, values, &relation.child_columns) else {
                continue;
            };
            if child_values.iter().any(Value::is_null) {
                continue;
            }
            let parent = self.data(&relation.parent_table)?;
            let found = parent.rows.values().filter_map(|r| r.values.as_ref()).any(|v| {
                column_values(&parent.schema, v, &relation.parent_columns).as_ref()
                    == Some(&child_values)
            });
            if !found {
                return Err(AdapterError::constraint(format!(
                    "{}: no parent row in {} for {}",
                    relation.name,
                    relation.parent_table,
                    render(&child_values)
                )));
            }
        }
        Ok(())
    }

    fn check_no_children(&self, schema: &SyncTable, values: &[Value]) -> AdapterResult<()> {
        for relation in self.relations.iter().filter(|r| r.parent_table == schema.name) {
            let Some(parent_values) = column_values(schema, values, &relation.parent_columns)
            else {
                continue;
            };
            let child = self.data(&relation.child_table)?;
            let referenced = child.rows.values().filter_map(|r| r.values.as_ref()).any(|v| {
                column_values(&child.schema, v, &relation.child_columns).as_ref()
                    == Some(&parent_values)
            });
            if referenced {
                return Err(AdapterError::constraint(format!(
                    "{}: row {} of {} is still referenced by {}",
                    relation.name,
                    render(&parent_values),
                    schema.name,
                    relation.child_table
                )));
            }
        }
        Ok(())
    }
}

impl TableData {
    /// Maps a row shaped by `source` onto the store schema. Columns the
    /// source does not carry keep their current value, or NULL.
    fn widen(
        &self,
        source: &SyncTable,
        row: &SyncRow,
        existing: Option<&TrackedRow>,
    ) -> AdapterResult<Vec<Value>> {
        if row.values.len() != source.columns.len() {
            return Err(AdapterError::InvalidRow(format!(
                "row has {} values, {} expects {}",
                row.values.len(),
                source.name,
                source.columns.len()
            )));
        }
        let current = existing.and_then(|r| r.values.as_ref());
        self.schema
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| match source.column_index(&column.name) {
                Some(j) => Ok(row.values[j].clone()),
                None => Ok(current.map(|v| v[i].clone()).unwrap_or(Value::Null)),
            })
            .collect()
    }
}

fn check_columns(schema: &SyncTable, values: &[Value]) -> AdapterResult<()> {
    if values.len() != schema.columns.len() {
        return Err(AdapterError::InvalidRow(format!(
            "row has {} values, {} expects {}",
            values.len(),
            schema.name,
            schema.columns.len()
        )));
    }
    for (column, value) in schema.columns.iter().zip(values) {
        if !column.data_type.accepts(value) {
            return Err(AdapterError::TypeMismatch {
                column: column.name.clone(),
                message: format!("{value} is not {:?}", column.data_type),
            });
        }
        if value.is_null() && (!column.allow_null || schema.is_primary_key(&column.name)) {
            return Err(AdapterError::constraint(format!(
                "{}.{} cannot be NULL",
                schema.name, column.name
            )));
        }
    }
    Ok(())
}

fn column_values(schema: &SyncTable, values: &[Value], columns: &[String]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|c| schema.column_index(c).and_then(|i| values.get(i).cloned()))
        .collect()
}

fn key_values(schema: &SyncTable, values: &[Value]) -> AdapterResult<Vec<Value>> {
    column_values(schema, values, &schema.primary_keys)
        .ok_or_else(|| AdapterError::InvalidRow(format!("{} has no usable primary key", schema.name)))
}

fn render(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl SyncProvider for MemoryProvider {
    type Connection = MemoryConnection;

    fn open(&self) -> AdapterResult<MemoryConnection> {
        Ok(MemoryConnection {
            transaction: None,
            constraints_enabled: true,
        })
    }

    fn begin(&self, conn: &mut MemoryConnection) -> AdapterResult<()> {
        if conn.transaction.is_some() {
            return Err(AdapterError::TransactionOpen);
        }
        conn.transaction = Some(self.shared.state.read().clone());
        self.shared.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self, conn: &mut MemoryConnection) -> AdapterResult<()> {
        let state = conn.transaction.take().ok_or(AdapterError::NoTransaction)?;
        *self.shared.state.write() = state;
        Ok(())
    }

    fn rollback(&self, conn: &mut MemoryConnection) -> AdapterResult<()> {
        conn.transaction
            .take()
            .map(|_| ())
            .ok_or(AdapterError::NoTransaction)
    }

    fn current_timestamp(&self, _conn: &mut MemoryConnection) -> AdapterResult<u64> {
        Ok(self.timestamp())
    }

    fn get_command(
        &self,
        table: &SyncTable,
        command_type: CommandType,
    ) -> AdapterResult<SyncCommand> {
        table
            .validate()
            .map_err(|e| AdapterError::InvalidRow(e.to_string()))?;
        Ok(SyncCommand::describe(table, command_type))
    }

    fn execute_bulk(
        &self,
        conn: &mut MemoryConnection,
        command: &SyncCommand,
        table: &SyncTable,
        rows: &[SyncRow],
        args: &ApplyArgs,
    ) -> AdapterResult<Vec<SyncRow>> {
        self.shared.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.take_injected_failure()?;
        let constraints = conn.constraints_enabled;
        self.with_state(conn, |state| {
            // All or nothing: work on a copy and only keep it if every row
            // went through.
            let mut scratch = state.clone();
            let mut conflicts = Vec::new();
            for (i, row) in rows.iter().enumerate() {
                let affected = self
                    .apply_row(&mut scratch, command, table, row, args, constraints)
                    .map_err(|e| match e {
                        AdapterError::Transient(_) => e,
                        other => AdapterError::Other(format!("bulk row {i}: {other}")),
                    })?;
                if affected == 0 {
                    conflicts.push(row.clone());
                }
            }
            *state = scratch;
            Ok(conflicts)
        })
    }

    fn execute_single(
        &self,
        conn: &mut MemoryConnection,
        command: &SyncCommand,
        table: &SyncTable,
        row: &SyncRow,
        args: &ApplyArgs,
    ) -> AdapterResult<u64> {
        self.take_injected_failure()?;
        let constraints = conn.constraints_enabled;
        self.with_state(conn, |state| {
            self.apply_row(state, command, table, row, args, constraints)
        })
    }

    fn select_row(
        &self,
        conn: &mut MemoryConnection,
        table: &SyncTable,
        row: &SyncRow,
    ) -> AdapterResult<Option<SyncRow>> {
        let key = row
            .key(table)
            .map_err(|e| AdapterError::InvalidRow(e.to_string()))?;
        self.with_state(conn, |state| {
            let data = state.data(&table.name)?;
            let Some(local) = data.rows.get(&key) else {
                return Ok(None);
            };
            let shaped = |values: &[Value]| -> Vec<Value> {
                table
                    .columns
                    .iter()
                    .map(|c| {
                        data.schema
                            .column_index(&c.name)
                            .and_then(|i| values.get(i).cloned())
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            };
            Ok(Some(match &local.values {
                Some(values) => SyncRow::modified(shaped(values)),
                // Tombstones only keep the key.
                None => {
                    let mut values = vec![Value::Null; table.columns.len()];
                    if let Ok(indices) = table.primary_key_indices() {
                        for i in indices {
                            values[i] = row.values[i].clone();
                        }
                    }
                    SyncRow::deleted(values)
                }
            }))
        })
    }

    fn disable_constraints(&self, conn: &mut MemoryConnection) -> AdapterResult<()> {
        conn.constraints_enabled = false;
        Ok(())
    }

    fn enable_constraints(&self, conn: &mut MemoryConnection) -> AdapterResult<()> {
        conn.constraints_enabled = true;
        Ok(())
    }

    fn load_scope(
        &self,
        conn: &mut MemoryConnection,
        name: &str,
    ) -> AdapterResult<Option<ScopeInfoClient>> {
        self.with_state(conn, |state| Ok(state.scopes.get(name).cloned()))
    }

    fn save_scope(&self, conn: &mut MemoryConnection, scope: &ScopeInfoClient) -> AdapterResult<()> {
        self.with_state(conn, |state| {
            state.scopes.insert(scope.name.clone(), scope.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_model::{DataType, SyncColumn};

    fn customer() -> SyncTable {
        SyncTable::new(TableName::new("Customer"))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_column(SyncColumn::new("name", DataType::Text).not_null())
            .with_primary_keys(["id"])
    }

    fn order() -> SyncTable {
        SyncTable::new(TableName::new("Order"))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_column(SyncColumn::new("customer_id", DataType::Integer))
            .with_primary_keys(["id"])
    }

    fn schema() -> SyncSet {
        SyncSet::new()
            .with_table(customer())
            .with_table(order())
            .with_relation(SyncRelation::new(
                "FK_Order_Customer",
                TableName::new("Order"),
                ["customer_id"],
                TableName::new("Customer"),
                ["id"],
            ))
    }

    fn args(last_timestamp: Option<u64>) -> ApplyArgs {
        ApplyArgs {
            scope_id: Uuid::from_u128(7),
            last_timestamp,
            force_write: false,
        }
    }

    fn update(provider: &MemoryProvider, table: &SyncTable) -> SyncCommand {
        provider.get_command(table, CommandType::UpdateRow).unwrap()
    }

    #[test]
    fn update_applies_to_unchanged_rows() {
        let provider = MemoryProvider::new(&schema());
        let name = TableName::new("Customer");
        provider.local_upsert(&name, vec![1i64.into(), "a".into()]).unwrap();
        let mut conn = provider.open().unwrap();
        let cmd = update(&provider, &customer());
        let row = SyncRow::modified(vec![1i64.into(), "b".into()]);

        let stale = provider
            .execute_single(&mut conn, &cmd, &customer(), &row, &args(Some(0)))
            .unwrap();
        assert_eq!(stale, 0);

        let fresh = provider
            .execute_single(&mut conn, &cmd, &customer(), &row, &args(Some(1)))
            .unwrap();
        assert_eq!(fresh, 1);
        assert_eq!(provider.get(&name, &[1i64.into()]).unwrap()[1], "b".into());
    }

    #[test]
    fn same_scope_never_conflicts() {
        let provider = MemoryProvider::new(&schema());
        let mut conn = provider.open().unwrap();
        let cmd = update(&provider, &customer());
        let row = SyncRow::modified(vec![1i64.into(), "a".into()]);
        assert_eq!(
            provider
                .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
                .unwrap(),
            1
        );
        assert_eq!(
            provider
                .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
                .unwrap(),
            1
        );
    }

    #[test]
    fn not_null_and_type_checks() {
        let provider = MemoryProvider::new(&schema());
        let mut conn = provider.open().unwrap();
        let cmd = update(&provider, &customer());

        let null_name = SyncRow::modified(vec![1i64.into(), Value::Null]);
        assert!(matches!(
            provider.execute_single(&mut conn, &cmd, &customer(), &null_name, &args(None)),
            Err(AdapterError::Constraint(_))
        ));

        let wrong_type = SyncRow::modified(vec!["x".into(), "a".into()]);
        assert!(matches!(
            provider.execute_single(&mut conn, &cmd, &customer(), &wrong_type, &args(None)),
            Err(AdapterError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn foreign_keys_can_be_disabled() {
        let provider = MemoryProvider::new(&schema());
        let mut conn = provider.open().unwrap();
        let cmd = update(&provider, &order());
        let orphan = SyncRow::modified(vec![10i64.into(), 99i64.into()]);

        assert!(matches!(
            provider.execute_single(&mut conn, &cmd, &order(), &orphan, &args(None)),
            Err(AdapterError::Constraint(_))
        ));

        provider.disable_constraints(&mut conn).unwrap();
        assert_eq!(
            provider
                .execute_single(&mut conn, &cmd, &order(), &orphan, &args(None))
                .unwrap(),
            1
        );
    }

    #[test]
    fn delete_of_referenced_parent_fails() {
        let provider = MemoryProvider::new(&schema());
        provider
            .local_upsert(&TableName::new("Customer"), vec![1i64.into(), "a".into()])
            .unwrap();
        provider
            .local_upsert(&TableName::new("Order"), vec![10i64.into(), 1i64.into()])
            .unwrap();
        let err = provider.local_delete(&TableName::new("Customer"), &[1i64.into()]);
        assert!(matches!(err, Err(AdapterError::Constraint(_))));
    }

    #[test]
    fn delete_of_missing_row_affects_nothing() {
        let provider = MemoryProvider::new(&schema());
        let mut conn = provider.open().unwrap();
        let cmd = provider.get_command(&customer(), CommandType::DeleteRow).unwrap();
        let row = SyncRow::deleted(vec![5i64.into(), Value::Null]);
        assert_eq!(
            provider
                .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
                .unwrap(),
            0
        );
    }

    #[test]
    fn bulk_is_all_or_nothing() {
        let provider = MemoryProvider::new(&schema());
        let mut conn = provider.open().unwrap();
        let cmd = provider.get_command(&customer(), CommandType::UpdateRows).unwrap();
        let rows = vec![
            SyncRow::modified(vec![1i64.into(), "a".into()]),
            SyncRow::modified(vec![2i64.into(), Value::Null]),
        ];
        assert!(provider
            .execute_bulk(&mut conn, &cmd, &customer(), &rows, &args(None))
            .is_err());
        assert_eq!(provider.row_count(&TableName::new("Customer")), 0);
    }

    #[test]
    fn transactions_commit_and_roll_back() {
        let provider = MemoryProvider::new(&schema());
        let name = TableName::new("Customer");
        let mut conn = provider.open().unwrap();
        let cmd = update(&provider, &customer());
        let row = SyncRow::modified(vec![1i64.into(), "a".into()]);

        provider.begin(&mut conn).unwrap();
        assert!(conn.in_transaction());
        provider
            .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
            .unwrap();
        assert_eq!(provider.row_count(&name), 0);
        provider.rollback(&mut conn).unwrap();
        assert_eq!(provider.row_count(&name), 0);

        provider.begin(&mut conn).unwrap();
        provider
            .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
            .unwrap();
        provider.commit(&mut conn).unwrap();
        assert_eq!(provider.row_count(&name), 1);
        assert!(matches!(
            provider.commit(&mut conn),
            Err(AdapterError::NoTransaction)
        ));
    }

    #[test]
    fn injected_failures_are_transient() {
        let provider = MemoryProvider::new(&schema());
        let mut conn = provider.open().unwrap();
        let cmd = update(&provider, &customer());
        let row = SyncRow::modified(vec![1i64.into(), "a".into()]);
        provider.fail_next(1);

        let err = provider
            .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
            .unwrap_err();
        assert!(provider.is_transient(&err));
        assert!(provider
            .execute_single(&mut conn, &cmd, &customer(), &row, &args(None))
            .is_ok());
    }

    #[test]
    fn select_row_reports_tombstones() {
        let provider = MemoryProvider::new(&schema());
        let name = TableName::new("Customer");
        provider.local_upsert(&name, vec![1i64.into(), "a".into()]).unwrap();
        provider.local_delete(&name, &[1i64.into()]).unwrap();
        assert!(provider.is_tombstone(&name, &[1i64.into()]));

        let mut conn = provider.open().unwrap();
        let lookup = SyncRow::modified(vec![1i64.into(), "z".into()]);
        let local = provider
            .select_row(&mut conn, &customer(), &lookup)
            .unwrap()
            .unwrap();
        assert_eq!(local.state, rowsync_model::RowState::Deleted);
        assert_eq!(local.values[0], 1i64.into());

        let missing = SyncRow::modified(vec![2i64.into(), "z".into()]);
        assert!(provider
            .select_row(&mut conn, &customer(), &missing)
            .unwrap()
            .is_none());
    }
}
