//! Conflict and error classification.

use crate::row::SyncRow;
use serde::{Deserialize, Serialize};

/// Which end of the client/server star is applying changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncSide {
    /// The client, applying rows downloaded from the server.
    Client,
    /// The server, applying rows uploaded by a client.
    Server,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolutionPolicy {
    /// The server's version of a row always survives.
    ServerWins,
    /// The client's version of a row always survives.
    ClientWins,
}

impl ConflictResolutionPolicy {
    /// Returns the resolution this policy prescribes.
    pub fn resolution(&self) -> ConflictResolution {
        match self {
            ConflictResolutionPolicy::ServerWins => ConflictResolution::ServerWins,
            ConflictResolutionPolicy::ClientWins => ConflictResolution::ClientWins,
        }
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictResolutionPolicy::ServerWins => 1,
            ConflictResolutionPolicy::ClientWins => 2,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictResolutionPolicy::ServerWins),
            2 => Some(ConflictResolutionPolicy::ClientWins),
            _ => None,
        }
    }
}

/// Shape of a conflict, from the point of view of the side applying rows.
///
/// "Remote" is the incoming row, "local" is the row currently in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// Both sides updated the row.
    RemoteExistsLocalExists,
    /// Remote updated a row that was deleted locally.
    RemoteExistsLocalIsDeleted,
    /// Remote deleted a row that was updated locally.
    RemoteIsDeletedLocalExists,
    /// Both sides deleted the row.
    RemoteIsDeletedLocalIsDeleted,
    /// Remote updated a row the target has never seen.
    RemoteExistsLocalNotExists,
    /// Remote deleted a row the target has never seen.
    RemoteIsDeletedLocalNotExists,
}

impl ConflictType {
    /// Returns true when neither side still holds the row.
    ///
    /// Such conflicts resolve without writing anything.
    pub fn is_deleted_on_both_sides(&self) -> bool {
        matches!(
            self,
            ConflictType::RemoteIsDeletedLocalIsDeleted
                | ConflictType::RemoteIsDeletedLocalNotExists
        )
    }
}

/// Decision returned for one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Keep the server's version.
    ServerWins,
    /// Keep the client's version.
    ClientWins,
    /// Force-write the given merged row.
    MergeRow(SyncRow),
    /// Abort the whole pass.
    Rollback,
}

/// Outcome of classifying a row that failed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorAction {
    /// Drop the row. It is counted as failed and not persisted.
    Ignore,
    /// Persist the row for replay on the next pass.
    Log,
    /// Persist the row as a terminal failure; it is not replayed.
    Continue,
    /// The handler fixed the cause; retry the row once now.
    Resolved,
    /// Persist the row and abort the pass.
    Throw,
}

impl Default for ErrorAction {
    fn default() -> Self {
        ErrorAction::Log
    }
}

impl ErrorAction {
    /// Returns true if rows classified this way go into the errors table.
    pub fn persists_row(&self) -> bool {
        matches!(
            self,
            ErrorAction::Log | ErrorAction::Continue | ErrorAction::Throw
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_codes() {
        assert_eq!(
            ConflictResolutionPolicy::from_code(1),
            Some(ConflictResolutionPolicy::ServerWins)
        );
        assert_eq!(
            ConflictResolutionPolicy::from_code(2),
            Some(ConflictResolutionPolicy::ClientWins)
        );
        assert_eq!(ConflictResolutionPolicy::from_code(0), None);
        assert_eq!(ConflictResolutionPolicy::ClientWins.to_code(), 2);
    }

    #[test]
    fn policy_resolution() {
        assert_eq!(
            ConflictResolutionPolicy::ServerWins.resolution(),
            ConflictResolution::ServerWins
        );
        assert_eq!(
            ConflictResolutionPolicy::ClientWins.resolution(),
            ConflictResolution::ClientWins
        );
    }

    #[test]
    fn error_action_persistence() {
        assert_eq!(ErrorAction::default(), ErrorAction::Log);
        assert!(ErrorAction::Log.persists_row());
        assert!(ErrorAction::Throw.persists_row());
        assert!(ErrorAction::Continue.persists_row());
        assert!(!ErrorAction::Ignore.persists_row());
        assert!(!ErrorAction::Resolved.persists_row());
    }

    #[test]
    fn deleted_on_both_sides() {
        assert!(ConflictType::RemoteIsDeletedLocalNotExists.is_deleted_on_both_sides());
        assert!(!ConflictType::RemoteIsDeletedLocalExists.is_deleted_on_both_sides());
    }
}
