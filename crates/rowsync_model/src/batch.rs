//! Batch descriptors.

use crate::schema::TableName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

/// One part of a batch: the rows of exactly one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPartInfo {
    /// Position of the part within its batch. Strictly increasing.
    pub index: u32,
    /// File name, relative to the batch directory.
    pub file_name: String,
    /// Table whose rows the part holds.
    pub table: TableName,
    /// Number of rows in the part.
    pub row_count: u64,
    /// Whether this is the final part of the batch.
    pub is_last: bool,
}

/// A change batch: a directory of parts.
///
/// Produced by change selection (or by the engine, for error batches) and
/// consumed by the apply engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Batch identifier.
    pub id: Uuid,
    /// Directory holding the part files, relative to the storage root.
    pub directory: PathBuf,
    /// Parts, in index order.
    pub parts: Vec<BatchPartInfo>,
    /// Timestamp of the source store when the batch was selected.
    pub timestamp: Option<u64>,
}

impl BatchInfo {
    /// Creates an empty batch rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            directory: directory.into(),
            parts: Vec::new(),
            timestamp: None,
        }
    }

    /// Sets the source timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Appends a part descriptor and returns it.
    ///
    /// The new part gets the next index and becomes the last part.
    pub fn add_part(&mut self, table: TableName, row_count: u64) -> &BatchPartInfo {
        let index = self.parts.last().map(|p| p.index + 1).unwrap_or(0);
        for part in &mut self.parts {
            part.is_last = false;
        }
        self.parts.push(BatchPartInfo {
            index,
            file_name: Self::part_file_name(&table, index),
            table,
            row_count,
            is_last: true,
        });
        &self.parts[self.parts.len() - 1]
    }

    /// Deterministic file name for a part.
    pub fn part_file_name(table: &TableName, index: u32) -> String {
        let mut name: String = table
            .to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        name.push_str(&format!("_{index:04}.rsbp"));
        name
    }

    /// Parts holding rows of `table`, in index order.
    pub fn parts_for<'a>(
        &'a self,
        table: &'a TableName,
    ) -> impl Iterator<Item = &'a BatchPartInfo> + 'a {
        self.parts.iter().filter(move |p| &p.table == table)
    }

    /// Distinct tables present in the batch.
    pub fn tables(&self) -> BTreeSet<&TableName> {
        self.parts.iter().map(|p| &p.table).collect()
    }

    /// Total number of rows across parts.
    pub fn row_count(&self) -> u64 {
        self.parts.iter().map(|p| p.row_count).sum()
    }

    /// Returns true if no part holds any row.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Checks that part indices are strictly increasing and only the final
    /// part is flagged last.
    pub fn is_well_formed(&self) -> bool {
        let increasing = self.parts.windows(2).all(|w| w[0].index < w[1].index);
        let last_flags = self
            .parts
            .iter()
            .enumerate()
            .all(|(i, p)| p.is_last == (i + 1 == self.parts.len()));
        increasing && last_flags
    }
}
