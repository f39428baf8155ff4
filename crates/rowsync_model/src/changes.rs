//! Per-table apply statistics.

use crate::schema::TableName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two directions a table's changes are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeDirection {
    /// Inserts and updates.
    Modified,
    /// Deletes.
    Deleted,
}

impl fmt::Display for ChangeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeDirection::Modified => write!(f, "modified"),
            ChangeDirection::Deleted => write!(f, "deleted"),
        }
    }
}

/// Counts for one table and one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table the counts belong to.
    pub table: TableName,
    /// Direction the counts belong to.
    pub direction: ChangeDirection,
    /// Rows written to the target, including rows force-written by conflict
    /// resolution.
    pub applied: u64,
    /// Conflicts resolved, whether or not the resolution wrote data.
    pub resolved_conflicts: u64,
    /// Rows that could not be applied.
    pub failed: u64,
}

impl TableChangesApplied {
    /// Creates an empty entry.
    pub fn new(table: TableName, direction: ChangeDirection) -> Self {
        Self {
            table,
            direction,
            applied: 0,
            resolved_conflicts: 0,
            failed: 0,
        }
    }

    /// Returns true if no row was counted.
    pub fn is_empty(&self) -> bool {
        self.applied == 0 && self.resolved_conflicts == 0 && self.failed == 0
    }

    /// Adds another entry's counts to this one.
    pub fn add(&mut self, other: &TableChangesApplied) {
        self.applied += other.applied;
        self.resolved_conflicts += other.resolved_conflicts;
        self.failed += other.failed;
    }
}

/// Accumulated counts for a whole pass.
///
/// Created once per pass and handed by reference into every table apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// One entry per (table, direction) touched during the pass.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `table` and `direction`, creating it if needed.
    pub fn entry(
        &mut self,
        table: &TableName,
        direction: ChangeDirection,
    ) -> &mut TableChangesApplied {
        let position = self
            .tables
            .iter()
            .position(|t| &t.table == table && t.direction == direction);
        match position {
            Some(i) => &mut self.tables[i],
            None => {
                self.tables
                    .push(TableChangesApplied::new(table.clone(), direction));
                let last = self.tables.len() - 1;
                &mut self.tables[last]
            }
        }
    }

    /// Returns the entry for `table` and `direction`, if any.
    pub fn get(&self, table: &TableName, direction: ChangeDirection) -> Option<&TableChangesApplied> {
        self.tables
            .iter()
            .find(|t| &t.table == table && t.direction == direction)
    }

    /// Folds another accumulator into this one.
    pub fn merge(&mut self, other: &DatabaseChangesApplied) {
        for entry in &other.tables {
            self.entry(&entry.table, entry.direction).add(entry);
        }
    }

    /// Total applied rows.
    pub fn total_applied(&self) -> u64 {
        self.tables.iter().map(|t| t.applied).sum()
    }

    /// Total resolved conflicts.
    pub fn total_resolved_conflicts(&self) -> u64 {
        self.tables.iter().map(|t| t.resolved_conflicts).sum()
    }

    /// Total failed rows.
    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }
}
