//! Error types for the model crate.

use crate::schema::TableName;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while validating schemas or shaping rows.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A table has no primary key columns.
    #[error("table {table} has no primary key")]
    MissingPrimaryKey {
        /// The offending table.
        table: TableName,
    },

    /// A column referenced by name does not exist on the table.
    #[error("column {column} not found on table {table}")]
    UnknownColumn {
        /// The table searched.
        table: TableName,
        /// The missing column.
        column: String,
    },

    /// A table referenced by name is not part of the set.
    #[error("table {table} is not part of the sync set")]
    UnknownTable {
        /// The missing table.
        table: TableName,
    },

    /// The same table appears twice in a set.
    #[error("table {table} is declared more than once")]
    DuplicateTable {
        /// The duplicated table.
        table: TableName,
    },

    /// A row does not carry one value per column.
    #[error("row for table {table} has {actual} values, expected {expected}")]
    RowShapeMismatch {
        /// Table the row belongs to.
        table: TableName,
        /// Number of columns on the table.
        expected: usize,
        /// Number of values on the row.
        actual: usize,
    },
}

impl ModelError {
    /// Creates an unknown column error.
    pub fn unknown_column(table: &TableName, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.clone(),
            column: column.into(),
        }
    }
}
