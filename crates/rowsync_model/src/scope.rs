//! Scope bookkeeping records.

use crate::batch::BatchInfo;
use crate::schema::SyncSet;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Server-side scope definition: the tables a scope synchronizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Scope name.
    pub name: String,
    /// Schema snapshot the scope was provisioned with.
    pub schema: SyncSet,
    /// Version of the setup the snapshot was generated from.
    pub version: String,
    /// Timestamp of the last metadata cleanup, if any.
    pub last_cleanup_timestamp: Option<u64>,
}

impl ScopeInfo {
    /// Creates a scope definition.
    pub fn new(name: impl Into<String>, schema: SyncSet) -> Self {
        Self {
            name: name.into(),
            schema,
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_cleanup_timestamp: None,
        }
    }
}

/// Namespace for scope identities derived from scope names.
const SCOPE_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6c, 0x1e, 0x8b, 0x52, 0x0f, 0x3d, 0x4a, 0x7e, 0x9b, 0x21, 0x5d, 0xc4, 0x30, 0x87, 0xa6, 0x19,
]);

/// Per-side bookkeeping for one scope.
///
/// A new record is produced at the end of each successful pass; the previous
/// record is never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfoClient {
    /// Identity stamped on rows written on behalf of this scope.
    ///
    /// Derived from the scope name, so a scope that has not committed a
    /// record yet keeps the same identity from one pass to the next.
    pub id: Uuid,
    /// Scope name.
    pub name: String,
    /// True until the first successful pass.
    pub is_new: bool,
    /// Local store timestamp captured by the last successful pass.
    pub last_sync_timestamp: Option<u64>,
    /// Remote timestamp acknowledged by the last successful pass.
    pub last_server_sync_timestamp: Option<u64>,
    /// Wall-clock end of the last successful pass.
    pub last_sync: Option<SystemTime>,
    /// Duration of the last successful pass.
    pub last_sync_duration: Duration,
    /// Rows that failed during the last pass, queued for the next one.
    pub errors: Option<BatchInfo>,
}

impl ScopeInfoClient {
    /// Creates the record of a scope that has never synced.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Self::id_for(&name),
            name,
            is_new: true,
            last_sync_timestamp: None,
            last_server_sync_timestamp: None,
            last_sync: None,
            last_sync_duration: Duration::ZERO,
            errors: None,
        }
    }

    /// Returns the identity of the scope called `name`.
    pub fn id_for(name: &str) -> Uuid {
        Uuid::new_v5(&SCOPE_ID_NAMESPACE, name.as_bytes())
    }

    /// Returns true if a non-empty error batch is queued.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().map(|b| !b.is_empty()).unwrap_or(false)
    }

    /// Builds the record that follows a successful pass.
    pub fn advanced(
        &self,
        local_timestamp: u64,
        remote_timestamp: Option<u64>,
        duration: Duration,
    ) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            is_new: false,
            last_sync_timestamp: Some(local_timestamp),
            last_server_sync_timestamp: remote_timestamp.or(self.last_server_sync_timestamp),
            last_sync: Some(SystemTime::now()),
            last_sync_duration: duration,
            errors: self.errors.clone(),
        }
    }

    /// Returns a copy carrying another error batch reference.
    pub fn with_errors(&self, errors: Option<BatchInfo>) -> Self {
        Self {
            errors,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableName;

    #[test]
    fn new_scope_has_no_history() {
        let scope = ScopeInfoClient::new("default");
        assert!(scope.is_new);
        assert_eq!(scope.last_sync_timestamp, None);
        assert!(!scope.has_errors());
    }

    #[test]
    fn unsaved_scope_keeps_its_identity() {
        let first = ScopeInfoClient::new("default");
        let second = ScopeInfoClient::new("default");
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, ScopeInfoClient::id_for("default"));
        assert_ne!(first.id, ScopeInfoClient::new("other").id);
    }

    #[test]
    fn advanced_keeps_identity_and_previous_server_timestamp() {
        let scope = ScopeInfoClient::new("default");
        let first = scope.advanced(100, Some(40), Duration::from_millis(5));
        assert_eq!(first.id, scope.id);
        assert!(!first.is_new);
        assert_eq!(first.last_sync_timestamp, Some(100));
        assert_eq!(first.last_server_sync_timestamp, Some(40));

        let second = first.advanced(150, None, Duration::from_millis(5));
        assert_eq!(second.last_server_sync_timestamp, Some(40));
        assert_eq!(first.last_sync_timestamp, Some(100));
    }

    #[test]
    fn error_reference() {
        let mut errors = BatchInfo::new("errors");
        errors.add_part(TableName::new("Customer"), 2);
        let scope = ScopeInfoClient::new("default").with_errors(Some(errors));
        assert!(scope.has_errors());
        assert!(!scope.with_errors(None).has_errors());
    }

    #[test]
    fn scope_info_carries_schema() {
        let scope = ScopeInfo::new("default", SyncSet::new());
        assert_eq!(scope.name, "default");
        assert!(scope.schema.tables.is_empty());
    }
}
