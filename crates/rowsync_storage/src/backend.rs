//! Batch storage trait definition.

use crate::error::StorageResult;
use crate::format::{self, PartHeader};
use rowsync_model::{BatchPartInfo, SyncRow, SyncTable};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Stores and retrieves batch part files.
///
/// # Invariants
///
/// - `write_part` either leaves a complete part or no part at all
/// - `open_part` can be called any number of times on the same part; each
///   call returns a fresh reader positioned at the first row
/// - Backends must be `Send + Sync` for concurrent passes
///
/// # Implementors
///
/// - [`super::InMemoryBatchStorage`] - For testing
/// - [`super::FileBatchStorage`] - For batches spilled to disk
pub trait BatchStorage: Send + Sync {
    /// Writes one part holding `rows` of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the underlying write fails.
    fn write_part(
        &self,
        directory: &Path,
        part: &BatchPartInfo,
        table: &SyncTable,
        rows: &[SyncRow],
    ) -> StorageResult<()>;

    /// Opens a part for lazy, forward-only reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the part is missing or its header is unreadable.
    fn open_part(&self, directory: &Path, part: &BatchPartInfo) -> StorageResult<PartReader>;

    /// Returns true if the part exists.
    fn part_exists(&self, directory: &Path, part: &BatchPartInfo) -> bool;

    /// Deletes a batch directory and every part in it.
    ///
    /// Deleting a batch that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn delete_batch(&self, directory: &Path) -> StorageResult<()>;
}

/// Lazy reader over the rows of one part.
///
/// Yields exactly `header().row_count` rows, then `None`.
pub struct PartReader {
    header: PartHeader,
    source: Box<dyn Read + Send>,
    remaining: u64,
    failed: bool,
}

impl PartReader {
    /// Reads the preamble from `source` and positions the reader on the
    /// first row.
    ///
    /// # Errors
    ///
    /// Returns an error if the preamble or header frame is invalid.
    pub fn new(mut source: Box<dyn Read + Send>) -> StorageResult<Self> {
        let header = format::read_preamble(&mut source)?;
        Ok(Self {
            remaining: header.row_count,
            header,
            source,
            failed: false,
        })
    }

    /// Returns the part header.
    pub fn header(&self) -> &PartHeader {
        &self.header
    }

    /// Returns the schema the rows are shaped by.
    pub fn table(&self) -> &SyncTable {
        &self.header.table
    }

    /// Number of rows not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for PartReader {
    type Item = StorageResult<SyncRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        match format::read_row(&mut self.source) {
            Ok(row) => {
                self.remaining -= 1;
                Some(Ok(row))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.failed { 0 } else { self.remaining as usize };
        (0, Some(remaining))
    }
}

impl fmt::Debug for PartReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartReader")
            .field("table", &self.header.table.name)
            .field("row_count", &self.header.row_count)
            .field("remaining", &self.remaining)
            .finish()
    }
}
