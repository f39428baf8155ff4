//! Conflict resolution.
//!
//! A conflict is a row whose apply affected nothing because the local
//! version changed since the last pass. The local row is read back, the
//! conflict is typed, and a resolution is chosen by the custom handler or
//! the policy. Which resolution forces the remote row depends on the side:
//! `ServerWins` forces it on the client and keeps the local row on the
//! server, `ClientWins` does the opposite.

use crate::error::{AdapterError, SyncError, SyncResult};
use crate::executor::ApplyContext;
use crate::provider::{CommandType, SyncCommand, SyncProvider};
use rowsync_model::{
    ChangeDirection, ConflictResolution, ConflictType, RowState, SyncRow, SyncSide, SyncTable,
    TableName,
};
use tracing::{debug, warn};

/// A conflict as presented to a [`crate::ConflictHandler`].
#[derive(Debug, Clone)]
pub struct SyncConflict {
    /// Table the row belongs to.
    pub table: TableName,
    /// Shape of the conflict.
    pub conflict_type: ConflictType,
    /// The incoming row.
    pub remote_row: SyncRow,
    /// The row currently in the target, if any.
    pub local_row: Option<SyncRow>,
    /// Side applying the rows.
    pub side: SyncSide,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Default)]
pub(crate) struct ConflictOutcome {
    pub applied: bool,
    pub resolved: bool,
    pub error: Option<AdapterError>,
}

impl ConflictOutcome {
    fn kept_local() -> Self {
        Self {
            applied: false,
            resolved: true,
            error: None,
        }
    }

    fn forced() -> Self {
        Self {
            applied: true,
            resolved: true,
            error: None,
        }
    }

    fn failed(error: AdapterError) -> Self {
        Self {
            applied: false,
            resolved: false,
            error: Some(error),
        }
    }
}

/// Types a conflict from the remote row and the local version.
pub fn conflict_type(remote: &SyncRow, local: Option<&SyncRow>) -> ConflictType {
    let remote_deleted = remote.state.direction() == Some(ChangeDirection::Deleted);
    let local_deleted = local.map(|l| l.state == RowState::Deleted);
    match (remote_deleted, local_deleted) {
        (false, Some(false)) => ConflictType::RemoteExistsLocalExists,
        (false, Some(true)) => ConflictType::RemoteExistsLocalIsDeleted,
        (false, None) => ConflictType::RemoteExistsLocalNotExists,
        (true, Some(false)) => ConflictType::RemoteIsDeletedLocalExists,
        (true, Some(true)) => ConflictType::RemoteIsDeletedLocalIsDeleted,
        (true, None) => ConflictType::RemoteIsDeletedLocalNotExists,
    }
}

/// Returns true if `resolution` makes the incoming row win on `side`.
pub fn remote_wins(resolution: &ConflictResolution, side: SyncSide) -> bool {
    matches!(
        (resolution, side),
        (ConflictResolution::ServerWins, SyncSide::Client)
            | (ConflictResolution::ClientWins, SyncSide::Server)
    )
}

/// Resolves one conflicting row.
///
/// Transient errors and rollback requests are returned as `Err`; any other
/// failure is reported in the outcome so the row reaches the error set.
pub(crate) fn resolve_conflict<P: SyncProvider>(
    ctx: &ApplyContext<'_, P>,
    conn: &mut P::Connection,
    table: &SyncTable,
    command: &SyncCommand,
    row: &SyncRow,
) -> SyncResult<ConflictOutcome> {
    let local = match ctx.provider.select_row(conn, table, row) {
        Ok(local) => local,
        Err(e) if ctx.is_transient(&e) => return Err(e.into()),
        Err(e) => return Ok(ConflictOutcome::failed(e)),
    };
    let conflict_type = conflict_type(row, local.as_ref());

    if conflict_type.is_deleted_on_both_sides() {
        debug!(table = %table.name, ?conflict_type, "conflict resolved without write");
        return Ok(ConflictOutcome::kept_local());
    }

    let conflict = SyncConflict {
        table: table.name.clone(),
        conflict_type,
        remote_row: row.clone(),
        local_row: local,
        side: ctx.options.side,
    };
    let resolution = ctx
        .interceptors
        .resolve_conflict(&conflict)
        .unwrap_or_else(|| ctx.options.conflict_resolution_policy.resolution());

    warn!(
        table = %table.name,
        ?conflict_type,
        ?resolution,
        side = ?ctx.options.side,
        "conflict detected"
    );

    let target = match resolution {
        ConflictResolution::Rollback => {
            return Err(SyncError::ConflictRollback {
                table: table.name.clone(),
            })
        }
        ConflictResolution::MergeRow(merged) => merged,
        other if remote_wins(&other, ctx.options.side) => conflict.remote_row,
        _ => return Ok(ConflictOutcome::kept_local()),
    };

    if target.values.len() != table.columns.len() {
        return Ok(ConflictOutcome::failed(AdapterError::InvalidRow(format!(
            "resolved row has {} values, {} expects {}",
            target.values.len(),
            table.name,
            table.columns.len()
        ))));
    }

    let direction = target.state.direction().unwrap_or(ChangeDirection::Modified);
    let forced_command;
    let command = if command.command_type.direction() == direction {
        command
    } else {
        let command_type = CommandType::for_direction(direction, false);
        forced_command = match ctx.provider.get_command(table, command_type) {
            Ok(c) => c,
            Err(e) => return Ok(ConflictOutcome::failed(e)),
        };
        &forced_command
    };

    match ctx
        .provider
        .execute_single(conn, command, table, &target, &ctx.args.forced())
    {
        Ok(0) => Ok(ConflictOutcome::failed(AdapterError::Other(
            "forced write affected no rows".into(),
        ))),
        Ok(_) => Ok(ConflictOutcome::forced()),
        Err(e) if ctx.is_transient(&e) => Err(e.into()),
        Err(e) => Ok(ConflictOutcome::failed(e)),
    }
}
