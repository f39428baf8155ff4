//! Rows and row states.

use crate::changes::ChangeDirection;
use crate::error::{ModelError, ModelResult};
use crate::schema::SyncTable;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The state tag carried by a [`SyncRow`].
///
/// Fresh changes are `Modified` or `Deleted`. Rows read back from a
/// persisted error batch carry either a retry tag (replayed by the next pass)
/// or a terminal failure tag (kept for inspection, never replayed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Pure error-log row with no change semantics.
    None,
    /// Row was inserted or updated.
    Modified,
    /// Row was deleted.
    Deleted,
    /// Upsert that failed and is replayed on the next pass.
    RetryModifiedOnNextSync,
    /// Delete that failed and is replayed on the next pass.
    RetryDeletedOnNextSync,
    /// Upsert that failed and is not retried.
    ApplyModifiedFailed,
    /// Delete that failed and is not retried.
    ApplyDeletedFailed,
}

impl RowState {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            RowState::None => 0,
            RowState::Modified => 1,
            RowState::Deleted => 2,
            RowState::RetryModifiedOnNextSync => 3,
            RowState::RetryDeletedOnNextSync => 4,
            RowState::ApplyModifiedFailed => 5,
            RowState::ApplyDeletedFailed => 6,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RowState::None),
            1 => Some(RowState::Modified),
            2 => Some(RowState::Deleted),
            3 => Some(RowState::RetryModifiedOnNextSync),
            4 => Some(RowState::RetryDeletedOnNextSync),
            5 => Some(RowState::ApplyModifiedFailed),
            6 => Some(RowState::ApplyDeletedFailed),
            _ => None,
        }
    }

    /// The apply direction this state belongs to, if any.
    pub fn direction(&self) -> Option<ChangeDirection> {
        match self {
            RowState::Modified
            | RowState::RetryModifiedOnNextSync
            | RowState::ApplyModifiedFailed => Some(ChangeDirection::Modified),
            RowState::Deleted
            | RowState::RetryDeletedOnNextSync
            | RowState::ApplyDeletedFailed => Some(ChangeDirection::Deleted),
            RowState::None => None,
        }
    }

    /// State of a row queued for replay in `direction`.
    pub fn retry_for(direction: ChangeDirection) -> Self {
        match direction {
            ChangeDirection::Modified => RowState::RetryModifiedOnNextSync,
            ChangeDirection::Deleted => RowState::RetryDeletedOnNextSync,
        }
    }

    /// State of a row that terminally failed in `direction`.
    pub fn failed_for(direction: ChangeDirection) -> Self {
        match direction {
            ChangeDirection::Modified => RowState::ApplyModifiedFailed,
            ChangeDirection::Deleted => RowState::ApplyDeletedFailed,
        }
    }

    /// Returns true for fresh changes.
    pub fn is_fresh(&self) -> bool {
        matches!(self, RowState::Modified | RowState::Deleted)
    }

    /// Returns true for rows queued for replay on the next pass.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RowState::RetryModifiedOnNextSync | RowState::RetryDeletedOnNextSync
        )
    }

    /// Returns true for rows that failed and will not be replayed.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            RowState::ApplyModifiedFailed | RowState::ApplyDeletedFailed
        )
    }

    /// Returns true if a row in this state should be applied in `direction`.
    pub fn applies_to(&self, direction: ChangeDirection) -> bool {
        !self.is_terminal_failure() && self.direction() == Some(direction)
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Canonical byte encoding of a primary key, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(Vec<u8>);

impl RowKey {
    /// Builds a key from primary key values, in key order.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut buf = Vec::new();
        for value in values {
            value.write_key_bytes(&mut buf);
        }
        Self(buf)
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One logical row change.
///
/// `values` holds one entry per column of the owning table, in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Column values.
    pub values: Vec<Value>,
    /// State tag.
    pub state: RowState,
}

impl SyncRow {
    /// Creates a row.
    pub fn new(values: Vec<Value>, state: RowState) -> Self {
        Self { values, state }
    }

    /// Creates a `Modified` row.
    pub fn modified(values: Vec<Value>) -> Self {
        Self::new(values, RowState::Modified)
    }

    /// Creates a `Deleted` row.
    pub fn deleted(values: Vec<Value>) -> Self {
        Self::new(values, RowState::Deleted)
    }

    /// Returns a copy of this row carrying another state.
    pub fn with_state(&self, state: RowState) -> Self {
        Self {
            values: self.values.clone(),
            state,
        }
    }

    /// Returns the value of a named column.
    pub fn get(&self, table: &SyncTable, column: &str) -> Option<&Value> {
        table.column_index(column).and_then(|i| self.values.get(i))
    }

    /// Returns the primary key values, in key order.
    ///
    /// # Errors
    ///
    /// Fails if the table has no usable primary key or the row is too short.
    pub fn primary_key(&self, table: &SyncTable) -> ModelResult<Vec<Value>> {
        self.check_shape(table)?;
        Ok(table
            .primary_key_indices()?
            .into_iter()
            .map(|i| self.values[i].clone())
            .collect())
    }

    /// Returns the canonical key of this row.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SyncRow::primary_key`].
    pub fn key(&self, table: &SyncTable) -> ModelResult<RowKey> {
        self.check_shape(table)?;
        let indices = table.primary_key_indices()?;
        Ok(RowKey::from_values(indices.iter().map(|&i| &self.values[i])))
    }

    fn check_shape(&self, table: &SyncTable) -> ModelResult<()> {
        if self.values.len() != table.columns.len() {
            return Err(ModelError::RowShapeMismatch {
                table: table.name.clone(),
                expected: table.columns.len(),
                actual: self.values.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SyncColumn, TableName};

    fn order_line() -> SyncTable {
        SyncTable::new(TableName::new("OrderLine"))
            .with_column(SyncColumn::new("order_id", DataType::Integer))
            .with_column(SyncColumn::new("qty", DataType::Integer))
            .with_column(SyncColumn::new("line", DataType::Integer))
            .with_primary_keys(["order_id", "line"])
    }

    #[test]
    fn row_state_codes() {
        for code in 0..=6u8 {
            let state = RowState::from_code(code).unwrap();
            assert_eq!(state.to_code(), code);
        }
        assert_eq!(RowState::from_code(7), None);
    }

    #[test]
    fn row_state_directions() {
        assert_eq!(
            RowState::RetryModifiedOnNextSync.direction(),
            Some(ChangeDirection::Modified)
        );
        assert_eq!(
            RowState::ApplyDeletedFailed.direction(),
            Some(ChangeDirection::Deleted)
        );
        assert_eq!(RowState::None.direction(), None);

        assert!(RowState::RetryDeletedOnNextSync.applies_to(ChangeDirection::Deleted));
        assert!(!RowState::ApplyDeletedFailed.applies_to(ChangeDirection::Deleted));
        assert!(!RowState::Modified.applies_to(ChangeDirection::Deleted));
    }

    #[test]
    fn retry_and_terminal_are_distinct() {
        assert!(RowState::RetryModifiedOnNextSync.is_retry());
        assert!(!RowState::RetryModifiedOnNextSync.is_terminal_failure());
        assert!(RowState::ApplyModifiedFailed.is_terminal_failure());
        assert!(!RowState::ApplyModifiedFailed.is_retry());

        for direction in [ChangeDirection::Modified, ChangeDirection::Deleted] {
            assert!(RowState::retry_for(direction).is_retry());
            assert!(RowState::failed_for(direction).is_terminal_failure());
            assert_eq!(RowState::retry_for(direction).direction(), Some(direction));
            assert_eq!(RowState::failed_for(direction).direction(), Some(direction));
        }
    }

    #[test]
    fn composite_primary_key() {
        let table = order_line();
        let row = SyncRow::modified(vec![10i64.into(), 3i64.into(), 2i64.into()]);
        assert_eq!(
            row.primary_key(&table).unwrap(),
            vec![Value::Integer(10), Value::Integer(2)]
        );
    }

    #[test]
    fn key_ignores_non_key_columns() {
        let table = order_line();
        let a = SyncRow::modified(vec![10i64.into(), 3i64.into(), 2i64.into()]);
        let b = SyncRow::deleted(vec![10i64.into(), 99i64.into(), 2i64.into()]);
        let c = SyncRow::modified(vec![10i64.into(), 3i64.into(), 1i64.into()]);
        assert_eq!(a.key(&table).unwrap(), b.key(&table).unwrap());
        assert_ne!(a.key(&table).unwrap(), c.key(&table).unwrap());
    }

    #[test]
    fn with_state_leaves_original_untouched() {
        let row = SyncRow::modified(vec![1i64.into()]);
        let retry = row.with_state(RowState::RetryModifiedOnNextSync);
        assert_eq!(row.state, RowState::Modified);
        assert_eq!(retry.state, RowState::RetryModifiedOnNextSync);
        assert_eq!(retry.values, row.values);
    }

    #[test]
    fn short_row_is_rejected() {
        let table = order_line();
        let row = SyncRow::modified(vec![1i64.into()]);
        assert!(matches!(
            row.key(&table),
            Err(ModelError::RowShapeMismatch { .. })
        ));
    }
}
