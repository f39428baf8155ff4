//! # rowsync model
//!
//! Value types shared by every rowsync crate.
//!
//! This crate provides:
//! - `SyncTable`, `SyncSet` and foreign-key `SyncRelation`s
//! - `SyncRow` and its `RowState` tag
//! - `BatchInfo` / `BatchPartInfo` describing a change batch on disk
//! - Conflict and error classification enums
//! - Scope bookkeeping records
//! - Per-table apply statistics
//! - The dependency orderer used to sequence table writes
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod changes;
mod conflict;
mod error;
mod order;
mod row;
mod schema;
mod scope;
mod value;

pub use batch::{BatchInfo, BatchPartInfo};
pub use changes::{ChangeDirection, DatabaseChangesApplied, TableChangesApplied};
pub use conflict::{
    ConflictResolution, ConflictResolutionPolicy, ConflictType, ErrorAction, SyncSide,
};
pub use error::{ModelError, ModelResult};
pub use order::dependency_order;
pub use row::{RowKey, RowState, SyncRow};
pub use schema::{DataType, SyncColumn, SyncRelation, SyncSet, SyncTable, TableName};
pub use scope::{ScopeInfo, ScopeInfoClient};
pub use value::Value;
