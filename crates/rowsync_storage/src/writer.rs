//! Batch writer.

use crate::backend::BatchStorage;
use crate::error::StorageResult;
use rowsync_model::{BatchInfo, SyncRow, SyncTable};

/// Writes rows into a batch, splitting each table into parts of at most
/// `max_rows_per_part` rows.
///
/// The descriptor is only returned by [`BatchWriter::finish`]; a writer that
/// is dropped half-way leaves parts on storage that no descriptor points
/// to, which callers clean up with [`BatchStorage::delete_batch`].
pub struct BatchWriter<'a> {
    storage: &'a dyn BatchStorage,
    batch: BatchInfo,
    max_rows_per_part: usize,
}

impl<'a> BatchWriter<'a> {
    /// Creates a writer appending to `batch`.
    ///
    /// A `max_rows_per_part` of zero is treated as one.
    pub fn new(storage: &'a dyn BatchStorage, batch: BatchInfo, max_rows_per_part: usize) -> Self {
        Self {
            storage,
            batch,
            max_rows_per_part: max_rows_per_part.max(1),
        }
    }

    /// Writes all rows of one table.
    ///
    /// Empty row sets produce no part.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; parts written before it stay on
    /// storage.
    pub fn write_table(&mut self, table: &SyncTable, rows: Vec<SyncRow>) -> StorageResult<()> {
        for chunk in rows.chunks(self.max_rows_per_part) {
            let part = self
                .batch
                .add_part(table.name.clone(), chunk.len() as u64)
                .clone();
            if let Err(e) = self
                .storage
                .write_part(&self.batch.directory, &part, table, chunk)
            {
                self.batch.parts.pop();
                if let Some(last) = self.batch.parts.last_mut() {
                    last.is_last = true;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Number of rows written so far.
    pub fn row_count(&self) -> u64 {
        self.batch.row_count()
    }

    /// Finishes the batch and returns its descriptor.
    pub fn finish(self) -> BatchInfo {
        tracing::debug!(
            directory = %self.batch.directory.display(),
            parts = self.batch.parts.len(),
            rows = self.batch.row_count(),
            "batch written"
        );
        self.batch
    }
}
