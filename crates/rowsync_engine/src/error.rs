//! Error types for the apply engine.

use crate::provider::CommandType;
use rowsync_model::{ChangeDirection, ModelError, TableName};
use rowsync_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for provider operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised by a [`crate::SyncProvider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Connectivity loss, lock timeout, deadlock. Expected to clear on retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A NOT NULL, foreign key or uniqueness constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A value does not fit its column.
    #[error("type mismatch on column {column}: {message}")]
    TypeMismatch {
        /// Offending column.
        column: String,
        /// Details.
        message: String,
    },

    /// The target store has no such table.
    #[error("unknown table {0}")]
    UnknownTable(TableName),

    /// The row cannot be bound to the command.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// A transaction is already open on the connection.
    #[error("transaction already open")]
    TransactionOpen,

    /// No transaction is open on the connection.
    #[error("no open transaction")]
    NoTransaction,

    /// Any other store failure.
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a constraint violation.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Default transient predicate.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// Errors that abort a sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Batch storage failure.
    #[error("batch storage error: {0}")]
    Storage(#[from] StorageError),

    /// Schema or row shape error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Provider failure outside of row application.
    #[error("provider error: {0}")]
    Adapter(#[from] AdapterError),

    /// Applying one table failed; carries the context needed to diagnose it.
    #[error(
        "applying {direction} rows of {table} failed (directory {}, file {}, command {}): {source}",
        directory.display(),
        file.as_deref().unwrap_or("-"),
        command.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
    )]
    ApplyFailed {
        /// Table being applied.
        table: TableName,
        /// Direction being applied.
        direction: ChangeDirection,
        /// Batch directory.
        directory: PathBuf,
        /// Part file, if the failure is tied to one.
        file: Option<String>,
        /// Command type in use.
        command: Option<CommandType>,
        /// Command text in use.
        command_text: Option<String>,
        /// Underlying error.
        source: Box<SyncError>,
    },

    /// A batch descriptor is inconsistent with the schema or with itself.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// A conflict handler asked for the pass to be rolled back.
    #[error("conflict on table {table} requested rollback")]
    ConflictRollback {
        /// Table the conflict occurred on.
        table: TableName,
    },

    /// A row error was classified as fatal.
    #[error("row of table {table} failed to apply: {error}")]
    RowApplyFailed {
        /// Table the row belongs to.
        table: TableName,
        /// The row error.
        error: AdapterError,
    },

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The retry cap was reached on a transient error.
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Creates an invalid batch error.
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch(message.into())
    }

    /// Returns true if this error can be retried, using the default
    /// transient predicate.
    pub fn is_retryable(&self) -> bool {
        self.is_transient_with(&|e: &AdapterError| e.is_transient())
    }

    /// Returns true if this error is transient according to `predicate`.
    ///
    /// Context wrappers are looked through.
    pub fn is_transient_with(&self, predicate: &dyn Fn(&AdapterError) -> bool) -> bool {
        match self {
            SyncError::Adapter(e) => predicate(e),
            SyncError::ApplyFailed { source, .. } => source.is_transient_with(predicate),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Adapter(AdapterError::transient("deadlock")).is_retryable());
        assert!(!SyncError::Adapter(AdapterError::constraint("fk")).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());

        let wrapped = SyncError::ApplyFailed {
            table: TableName::new("Customer"),
            direction: ChangeDirection::Modified,
            directory: PathBuf::from("in"),
            file: None,
            command: Some(CommandType::UpdateRows),
            command_text: None,
            source: Box::new(SyncError::Adapter(AdapterError::transient("timeout"))),
        };
        assert!(wrapped.is_retryable());
        assert!(!wrapped.is_transient_with(&|_| false));
    }

    #[test]
    fn apply_failed_display_carries_context() {
        let err = SyncError::ApplyFailed {
            table: TableName::new("Order"),
            direction: ChangeDirection::Deleted,
            directory: PathBuf::from("batch-1"),
            file: Some("Order_0003.rsbp".into()),
            command: Some(CommandType::DeleteRow),
            command_text: Some("DELETE FROM Order WHERE id = @id".into()),
            source: Box::new(SyncError::invalid_batch("boom")),
        };
        let text = err.to_string();
        assert!(text.contains("Order_0003.rsbp"));
        assert!(text.contains("batch-1"));
        assert!(text.contains("DeleteRow"));
        assert!(text.contains("boom"));
    }
}
