//! # rowsync engine
//!
//! Applies change batches to a target store.
//!
//! This crate provides:
//! - Dependency-ordered apply (parents before children, deletes reversed)
//! - Bulk execution with per-row fallback
//! - Conflict detection and resolution
//! - Error classification and a persisted retry queue
//! - Transaction modes and transient-failure retry
//! - The sync-pass state machine
//!
//! ## Architecture
//!
//! A pass replays the rows that failed last time, applies the incoming
//! batch, then saves the next scope record together with the rows that
//! failed during this pass:
//!
//! ```text
//! ReplayErrors -> ApplyIncoming -> UpdateScope -> PersistErrors -> Done
//!       \______________\________________\______________\_____-> Failed
//! ```
//!
//! The target store is reached through [`SyncProvider`]; batches are read
//! through `rowsync_storage::BatchStorage`.
//!
//! ## Key Invariants
//!
//! - Parent tables are written before children; deletes run the other way
//! - A failed pass never advances the scope record
//! - Replaying an already-applied batch is a no-op
//! - A row leaves the retry queue only when applied or superseded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod errors;
mod executor;
mod interceptors;
mod memory;
mod provider;

pub use config::{RetryConfig, SyncOptions, TransactionMode};
pub use conflict::{conflict_type, remote_wins, SyncConflict};
pub use engine::{
    ApplyChangesRequest, ApplyChangesResult, CancelHandle, SyncEngine, SyncPassState, SyncStats,
};
pub use error::{AdapterError, AdapterResult, SyncError, SyncResult};
pub use errors::{ErrorRecord, ErrorsTable, SyncRowError};
pub use interceptors::{
    ConflictHandler, ErrorHandler, RetryAttempt, RetryNotifier, SyncInterceptors, SyncObserver,
};
pub use memory::{MemoryConnection, MemoryProvider, WriteKind, WriteRecord};
pub use provider::{ApplyArgs, CommandType, SyncCommand, SyncProvider};
