//! # rowsync storage
//!
//! Storage for change batches.
//!
//! A batch is a directory of part files; each part holds the rows of one
//! table. Backends only move part files around: they never interpret row
//! contents beyond the framing defined in [`format`].
//!
//! ## Available Backends
//!
//! - [`InMemoryBatchStorage`] - For testing and in-process batches
//! - [`FileBatchStorage`] - For batches spilled to disk
//!
//! ## Example
//!
//! ```rust
//! use rowsync_model::{BatchInfo, DataType, SyncColumn, SyncRow, SyncTable, TableName};
//! use rowsync_storage::{BatchStorage, BatchWriter, InMemoryBatchStorage};
//!
//! let table = SyncTable::new(TableName::new("Customer"))
//!     .with_column(SyncColumn::new("id", DataType::Integer))
//!     .with_primary_keys(["id"]);
//!
//! let storage = InMemoryBatchStorage::new();
//! let mut writer = BatchWriter::new(&storage, BatchInfo::new("batch-1"), 100);
//! writer.write_table(&table, vec![SyncRow::modified(vec![1i64.into()])]).unwrap();
//! let batch = writer.finish();
//!
//! let mut reader = storage.open_part(&batch.directory, &batch.parts[0]).unwrap();
//! assert_eq!(reader.next().unwrap().unwrap().values[0], 1i64.into());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod format;
mod memory;
mod writer;

pub use backend::{BatchStorage, PartReader};
pub use error::{StorageError, StorageResult};
pub use file::FileBatchStorage;
pub use format::PartHeader;
pub use memory::InMemoryBatchStorage;
pub use writer::BatchWriter;
