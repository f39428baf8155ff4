//! Relational adapter capability.
//!
//! The engine never builds statements itself. A [`SyncProvider`] turns a
//! table schema plus a [`CommandType`] into a [`SyncCommand`] and executes
//! it against a connection, reporting affected rows so that a stale version
//! (zero rows affected) is distinguishable from a failure.

use crate::error::{AdapterError, AdapterResult};
use rowsync_model::{ChangeDirection, ScopeInfoClient, SyncRow, SyncTable, TableName};
use std::fmt;
use uuid::Uuid;

/// Kind of statement a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Insert one row. Used when the target is initialized from scratch.
    InsertRow,
    /// Insert or update one row, guarded by the row version.
    UpdateRow,
    /// Delete one row, guarded by the row version.
    DeleteRow,
    /// Bulk variant of [`CommandType::InsertRow`].
    InsertRows,
    /// Bulk variant of [`CommandType::UpdateRow`].
    UpdateRows,
    /// Bulk variant of [`CommandType::DeleteRow`].
    DeleteRows,
}

impl CommandType {
    /// Single-row command for applying `direction`.
    ///
    /// Reinitializing targets use plain inserts.
    pub fn for_direction(direction: ChangeDirection, reinitialize: bool) -> Self {
        match (direction, reinitialize) {
            (ChangeDirection::Modified, true) => CommandType::InsertRow,
            (ChangeDirection::Modified, false) => CommandType::UpdateRow,
            (ChangeDirection::Deleted, _) => CommandType::DeleteRow,
        }
    }

    /// Returns the bulk variant.
    pub fn bulk(&self) -> Self {
        match self {
            CommandType::InsertRow | CommandType::InsertRows => CommandType::InsertRows,
            CommandType::UpdateRow | CommandType::UpdateRows => CommandType::UpdateRows,
            CommandType::DeleteRow | CommandType::DeleteRows => CommandType::DeleteRows,
        }
    }

    /// Returns the single-row variant.
    pub fn single(&self) -> Self {
        match self {
            CommandType::InsertRow | CommandType::InsertRows => CommandType::InsertRow,
            CommandType::UpdateRow | CommandType::UpdateRows => CommandType::UpdateRow,
            CommandType::DeleteRow | CommandType::DeleteRows => CommandType::DeleteRow,
        }
    }

    /// Returns true for bulk variants.
    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            CommandType::InsertRows | CommandType::UpdateRows | CommandType::DeleteRows
        )
    }

    /// Direction this command applies.
    pub fn direction(&self) -> ChangeDirection {
        match self.single() {
            CommandType::DeleteRow => ChangeDirection::Deleted,
            _ => ChangeDirection::Modified,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A prepared command for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    /// Target table.
    pub table: TableName,
    /// Command kind.
    pub command_type: CommandType,
    /// Statement text, kept for diagnostics.
    pub text: String,
}

impl SyncCommand {
    /// Builds a command whose text is a parameterized SQL-like rendering of
    /// `table` for `command_type`.
    pub fn describe(table: &SyncTable, command_type: CommandType) -> Self {
        let keys = table
            .primary_keys
            .iter()
            .map(|k| format!("{k} = @{k}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let body = match command_type.single() {
            CommandType::InsertRow => {
                let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
                let params: Vec<String> = names.iter().map(|n| format!("@{n}")).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.name,
                    names.join(", "),
                    params.join(", ")
                )
            }
            CommandType::UpdateRow => {
                let sets = table
                    .mutable_columns()
                    .map(|c| format!("{0} = @{0}", c.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {} SET {} WHERE {} AND (timestamp <= @last_timestamp OR update_scope_id = @scope_id OR @force_write = 1)",
                    table.name, sets, keys
                )
            }
            _ => format!(
                "DELETE FROM {} WHERE {} AND (timestamp <= @last_timestamp OR update_scope_id = @scope_id OR @force_write = 1)",
                table.name, keys
            ),
        };
        let text = if command_type.is_bulk() {
            format!("-- bulk\n{body}")
        } else {
            body
        };
        Self {
            table: table.name.clone(),
            command_type,
            text,
        }
    }
}

/// Per-call arguments of an apply command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyArgs {
    /// Scope stamped on written rows.
    pub scope_id: Uuid,
    /// Local timestamp of the last successful pass. Rows changed after it
    /// are conflicts unless written by the same scope.
    pub last_timestamp: Option<u64>,
    /// Write even if the row changed since `last_timestamp`.
    pub force_write: bool,
}

impl ApplyArgs {
    /// Returns a copy with `force_write` set.
    pub fn forced(&self) -> Self {
        Self {
            force_write: true,
            ..*self
        }
    }
}

/// Capability interface of a target store.
///
/// Implementations exist per backend; the engine depends only on this trait.
/// All row-level methods report "no rows affected" as `Ok(0)` (or as a
/// returned conflict row for bulk calls), never as an error.
pub trait SyncProvider: Send + Sync {
    /// Connection type. Owned by one pass at a time.
    type Connection: Send;

    /// Opens a connection.
    fn open(&self) -> AdapterResult<Self::Connection>;

    /// Begins a transaction.
    fn begin(&self, conn: &mut Self::Connection) -> AdapterResult<()>;

    /// Commits the open transaction.
    fn commit(&self, conn: &mut Self::Connection) -> AdapterResult<()>;

    /// Rolls back the open transaction.
    fn rollback(&self, conn: &mut Self::Connection) -> AdapterResult<()>;

    /// Current change-tracking timestamp of the store.
    fn current_timestamp(&self, conn: &mut Self::Connection) -> AdapterResult<u64>;

    /// Store-specific transient predicate.
    fn is_transient(&self, error: &AdapterError) -> bool {
        error.is_transient()
    }

    /// Whether the store can execute bulk commands.
    fn supports_bulk_operations(&self) -> bool {
        true
    }

    /// Prepares a command for `table`.
    fn get_command(&self, table: &SyncTable, command_type: CommandType)
        -> AdapterResult<SyncCommand>;

    /// Executes a bulk command. Returns the rows that affected nothing.
    ///
    /// An error fails the whole chunk.
    fn execute_bulk(
        &self,
        conn: &mut Self::Connection,
        command: &SyncCommand,
        table: &SyncTable,
        rows: &[SyncRow],
        args: &ApplyArgs,
    ) -> AdapterResult<Vec<SyncRow>>;

    /// Executes a single-row command. Returns the number of affected rows.
    fn execute_single(
        &self,
        conn: &mut Self::Connection,
        command: &SyncCommand,
        table: &SyncTable,
        row: &SyncRow,
        args: &ApplyArgs,
    ) -> AdapterResult<u64>;

    /// Reads the local version of `row`, by primary key.
    ///
    /// Returns a `Modified` row if it exists, a `Deleted` row if only its
    /// tombstone exists, or `None`.
    fn select_row(
        &self,
        conn: &mut Self::Connection,
        table: &SyncTable,
        row: &SyncRow,
    ) -> AdapterResult<Option<SyncRow>>;

    /// Disables constraint checking on the connection.
    fn disable_constraints(&self, conn: &mut Self::Connection) -> AdapterResult<()>;

    /// Re-enables constraint checking on the connection.
    fn enable_constraints(&self, conn: &mut Self::Connection) -> AdapterResult<()>;

    /// Loads the scope record for `name`.
    fn load_scope(
        &self,
        conn: &mut Self::Connection,
        name: &str,
    ) -> AdapterResult<Option<ScopeInfoClient>>;

    /// Upserts the scope record, keyed by name.
    fn save_scope(&self, conn: &mut Self::Connection, scope: &ScopeInfoClient)
        -> AdapterResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_model::{DataType, SyncColumn};

    fn product() -> SyncTable {
        SyncTable::new(TableName::new("Product"))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_column(SyncColumn::new("name", DataType::Text))
            .with_primary_keys(["id"])
    }

    #[test]
    fn command_for_direction() {
        assert_eq!(
            CommandType::for_direction(ChangeDirection::Modified, true),
            CommandType::InsertRow
        );
        assert_eq!(
            CommandType::for_direction(ChangeDirection::Modified, false),
            CommandType::UpdateRow
        );
        assert_eq!(
            CommandType::for_direction(ChangeDirection::Deleted, true),
            CommandType::DeleteRow
        );
    }

    #[test]
    fn bulk_and_single_variants() {
        assert_eq!(CommandType::UpdateRow.bulk(), CommandType::UpdateRows);
        assert_eq!(CommandType::DeleteRows.single(), CommandType::DeleteRow);
        assert!(CommandType::InsertRows.is_bulk());
        assert_eq!(CommandType::DeleteRows.direction(), ChangeDirection::Deleted);
        assert_eq!(CommandType::InsertRows.direction(), ChangeDirection::Modified);
    }

    #[test]
    fn command_text() {
        let update = SyncCommand::describe(&product(), CommandType::UpdateRow);
        assert!(update.text.starts_with("UPDATE Product SET name = @name WHERE id = @id"));

        let insert = SyncCommand::describe(&product(), CommandType::InsertRows);
        assert!(insert.text.contains("INSERT INTO Product (id, name) VALUES (@id, @name)"));
        assert!(insert.text.starts_with("-- bulk"));
    }

    #[test]
    fn forced_args() {
        let args = ApplyArgs {
            scope_id: Uuid::nil(),
            last_timestamp: Some(5),
            force_write: false,
        };
        let forced = args.forced();
        assert!(forced.force_write);
        assert_eq!(forced.last_timestamp, Some(5));
    }
}
