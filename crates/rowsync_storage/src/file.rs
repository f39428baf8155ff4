//! File-based batch storage.

use crate::backend::{BatchStorage, PartReader};
use crate::error::{StorageError, StorageResult};
use crate::format::{self, PartHeader};
use rowsync_model::{BatchInfo, BatchPartInfo, SyncRow, SyncTable};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Batch storage rooted at a directory on disk.
///
/// Batch directories are resolved relative to the root. Parts are written
/// to a temporary file, synced, then renamed into place, so a crash never
/// leaves a half-written part under its final name.
///
/// # Example
///
/// ```no_run
/// use rowsync_storage::FileBatchStorage;
///
/// let storage = FileBatchStorage::open("/var/lib/rowsync/batches").unwrap();
/// assert!(storage.root().ends_with("batches"));
/// ```
#[derive(Debug, Clone)]
pub struct FileBatchStorage {
    root: PathBuf,
}

impl FileBatchStorage {
    /// Opens storage at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a part file.
    pub fn part_path(&self, directory: &Path, part: &BatchPartInfo) -> PathBuf {
        self.root.join(directory).join(&part.file_name)
    }

    /// Rebuilds the descriptor of a batch from the part files in `directory`.
    ///
    /// Parts are ordered by the index encoded in their file name; the table
    /// and row count come from each part header. The batch timestamp is not
    /// stored in parts and is left unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed, a part name
    /// carries no index, or a header cannot be read.
    pub fn scan_batch(&self, directory: &Path) -> StorageResult<BatchInfo> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.root.join(directory))? {
            let file_name = match entry?.file_name().into_string() {
                Ok(name) if name.ends_with(PART_EXTENSION) => name,
                _ => continue,
            };
            let index = part_index(&file_name).ok_or_else(|| {
                StorageError::corrupted(format!("part name {file_name} carries no index"))
            })?;
            found.push((index, file_name));
        }
        found.sort();

        let mut batch = BatchInfo::new(directory);
        for (index, file_name) in found {
            let path = self.root.join(directory).join(&file_name);
            let header = format::read_preamble(&mut BufReader::new(File::open(&path)?))?;
            batch.parts.push(BatchPartInfo {
                index,
                file_name,
                table: header.table.name,
                row_count: header.row_count,
                is_last: false,
            });
        }
        if let Some(last) = batch.parts.last_mut() {
            last.is_last = true;
        }
        tracing::debug!(
            directory = %directory.display(),
            parts = batch.parts.len(),
            "scanned batch directory"
        );
        Ok(batch)
    }
}

const PART_EXTENSION: &str = ".rsbp";

/// Parses the index out of `<table>_<index>.rsbp`.
fn part_index(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(PART_EXTENSION)?;
    let (_, index) = stem.rsplit_once('_')?;
    index.parse().ok()
}

impl BatchStorage for FileBatchStorage {
    fn write_part(
        &self,
        directory: &Path,
        part: &BatchPartInfo,
        table: &SyncTable,
        rows: &[SyncRow],
    ) -> StorageResult<()> {
        let dir = self.root.join(directory);
        fs::create_dir_all(&dir)?;

        let path = dir.join(&part.file_name);
        let tmp = dir.join(format!("{}.tmp", part.file_name));
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            let header = PartHeader {
                table: table.clone(),
                row_count: rows.len() as u64,
            };
            format::write_preamble(&mut writer, &header)?;
            for row in rows {
                format::write_row(&mut writer, row)?;
            }
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| StorageError::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        tracing::trace!(path = %path.display(), rows = rows.len(), "wrote batch part");
        Ok(())
    }

    fn open_part(&self, directory: &Path, part: &BatchPartInfo) -> StorageResult<PartReader> {
        let path = self.part_path(directory, part);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::PartNotFound { path });
            }
            Err(e) => return Err(e.into()),
        };
        PartReader::new(Box::new(BufReader::new(file)))
    }

    fn part_exists(&self, directory: &Path, part: &BatchPartInfo) -> bool {
        self.part_path(directory, part).is_file()
    }

    fn delete_batch(&self, directory: &Path) -> StorageResult<()> {
        let dir = self.root.join(directory);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(directory = %dir.display(), "deleted batch directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_model::{BatchInfo, DataType, SyncColumn, TableName, Value};
    use tempfile::tempdir;

    fn table() -> SyncTable {
        SyncTable::new(TableName::with_schema("sales", "Order"))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_column(SyncColumn::new("note", DataType::Text))
            .with_primary_keys(["id"])
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let mut batch = BatchInfo::new("incoming");
        let part = batch.add_part(table().name, 2).clone();
        let rows = vec![
            SyncRow::modified(vec![1i64.into(), "first".into()]),
            SyncRow::deleted(vec![2i64.into(), Value::Null]),
        ];

        storage
            .write_part(&batch.directory, &part, &table(), &rows)
            .unwrap();
        assert!(storage.part_exists(&batch.directory, &part));

        let reader = storage.open_part(&batch.directory, &part).unwrap();
        assert_eq!(reader.header().row_count, 2);
        let read: Vec<_> = reader.collect::<StorageResult<_>>().unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn file_no_temp_left_behind() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let mut batch = BatchInfo::new("incoming");
        let part = batch.add_part(table().name, 0).clone();
        storage
            .write_part(&batch.directory, &part, &table(), &[])
            .unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("incoming"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![part.file_name.clone()]);
    }

    #[test]
    fn file_missing_part() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let mut batch = BatchInfo::new("nowhere");
        let part = batch.add_part(table().name, 1).clone();
        assert!(matches!(
            storage.open_part(&batch.directory, &part),
            Err(StorageError::PartNotFound { .. })
        ));
    }

    #[test]
    fn file_truncated_part_reports_corruption() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let mut batch = BatchInfo::new("incoming");
        let part = batch.add_part(table().name, 1).clone();
        let rows = vec![SyncRow::modified(vec![1i64.into(), "x".into()])];
        storage
            .write_part(&batch.directory, &part, &table(), &rows)
            .unwrap();

        let path = storage.part_path(&batch.directory, &part);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let mut reader = storage.open_part(&batch.directory, &part).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(StorageError::Corrupted(_)))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn file_scan_batch() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let mut batch = BatchInfo::new("scanned");
        let other = SyncTable::new(TableName::new("Customer"))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_primary_keys(["id"]);
        for (table, count) in [(table(), 2u64), (other.clone(), 1), (table(), 1)] {
            let part = batch.add_part(table.name.clone(), count).clone();
            let rows: Vec<_> = (0..count)
                .map(|i| {
                    let mut values = vec![Value::Integer(i as i64)];
                    values.resize(table.columns.len(), Value::Null);
                    SyncRow::modified(values)
                })
                .collect();
            storage
                .write_part(&batch.directory, &part, &table, &rows)
                .unwrap();
        }

        let scanned = storage.scan_batch(&batch.directory).unwrap();
        assert_eq!(scanned.parts, batch.parts);
        assert!(scanned.is_well_formed());
        assert_eq!(scanned.row_count(), 4);
    }

    #[test]
    fn part_index_parsing() {
        assert_eq!(part_index("sales_Order_0012.rsbp"), Some(12));
        assert_eq!(part_index("Order.rsbp"), None);
        assert_eq!(part_index("Order_0001.tmp"), None);
    }

    #[test]
    fn file_delete_batch() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let mut batch = BatchInfo::new("gone");
        let part = batch.add_part(table().name, 0).clone();
        storage
            .write_part(&batch.directory, &part, &table(), &[])
            .unwrap();

        storage.delete_batch(&batch.directory).unwrap();
        assert!(!storage.part_exists(&batch.directory, &part));
        // Deleting twice is fine.
        storage.delete_batch(&batch.directory).unwrap();
    }
}
