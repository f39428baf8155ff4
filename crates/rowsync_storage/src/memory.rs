//! In-memory batch storage for testing.

use crate::backend::{BatchStorage, PartReader};
use crate::error::{StorageError, StorageResult};
use crate::format;
use parking_lot::RwLock;
use rowsync_model::{BatchPartInfo, SyncRow, SyncTable};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Batch storage that keeps encoded parts in memory.
///
/// Parts are stored in the same framed format as on disk, so readers
/// exercise the real decoding path.
///
/// # Example
///
/// ```rust
/// use rowsync_storage::InMemoryBatchStorage;
///
/// let storage = InMemoryBatchStorage::new();
/// assert_eq!(storage.part_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBatchStorage {
    parts: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryBatchStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parts currently stored.
    pub fn part_count(&self) -> usize {
        self.parts.read().len()
    }

    /// Returns the raw bytes of a part, if present.
    ///
    /// Useful for corrupting parts in recovery tests.
    pub fn raw_part(&self, directory: &Path, part: &BatchPartInfo) -> Option<Vec<u8>> {
        self.parts.read().get(&directory.join(&part.file_name)).cloned()
    }

    /// Replaces the raw bytes of a part.
    pub fn set_raw_part(&self, directory: &Path, part: &BatchPartInfo, bytes: Vec<u8>) {
        self.parts
            .write()
            .insert(directory.join(&part.file_name), bytes);
    }
}

impl BatchStorage for InMemoryBatchStorage {
    fn write_part(
        &self,
        directory: &Path,
        part: &BatchPartInfo,
        table: &SyncTable,
        rows: &[SyncRow],
    ) -> StorageResult<()> {
        let bytes = format::encode_part(table, rows)?;
        self.parts
            .write()
            .insert(directory.join(&part.file_name), bytes);
        Ok(())
    }

    fn open_part(&self, directory: &Path, part: &BatchPartInfo) -> StorageResult<PartReader> {
        let path = directory.join(&part.file_name);
        let bytes = self
            .parts
            .read()
            .get(&path)
            .cloned()
            .ok_or(StorageError::PartNotFound { path })?;
        PartReader::new(Box::new(Cursor::new(bytes)))
    }

    fn part_exists(&self, directory: &Path, part: &BatchPartInfo) -> bool {
        self.parts
            .read()
            .contains_key(&directory.join(&part.file_name))
    }

    fn delete_batch(&self, directory: &Path) -> StorageResult<()> {
        self.parts.write().retain(|path, _| !path.starts_with(directory));
        Ok(())
    }
}
