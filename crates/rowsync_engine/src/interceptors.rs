//! Caller-supplied callbacks.

use crate::conflict::SyncConflict;
use crate::errors::SyncRowError;
use rowsync_model::{ChangeDirection, ConflictResolution, ErrorAction, TableChangesApplied, TableName};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Custom conflict resolution.
///
/// Any `Fn(&SyncConflict) -> ConflictResolution` closure is a handler.
pub trait ConflictHandler: Send + Sync {
    /// Decides how a conflict is resolved.
    fn resolve(&self, conflict: &SyncConflict) -> ConflictResolution;
}

impl<F> ConflictHandler for F
where
    F: Fn(&SyncConflict) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, conflict: &SyncConflict) -> ConflictResolution {
        self(conflict)
    }
}

/// Classification of rows that failed to apply.
///
/// Any `Fn(&SyncRowError) -> ErrorAction` closure is a handler.
pub trait ErrorHandler: Send + Sync {
    /// Classifies one failed row.
    fn classify(&self, error: &SyncRowError) -> ErrorAction;
}

impl<F> ErrorHandler for F
where
    F: Fn(&SyncRowError) -> ErrorAction + Send + Sync,
{
    fn classify(&self, error: &SyncRowError) -> ErrorAction {
        self(error)
    }
}

/// Progress hooks around each batch part.
pub trait SyncObserver: Send + Sync {
    /// Called before each chunk of rows is applied.
    fn rows_applying(&self, _table: &TableName, _direction: ChangeDirection, _row_count: usize) {}

    /// Called after the rows of one part are applied, with that part's counts.
    fn rows_applied(&self, _changes: &TableChangesApplied) {}
}

/// Details passed to the retry notifier before each retry.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// Retry number, starting at 1.
    pub attempt: u32,
    /// Delay before the retry.
    pub delay: Duration,
    /// Error that triggered the retry.
    pub error: String,
}

/// Callback invoked before each transient retry.
pub type RetryNotifier = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// The set of callbacks installed on an engine.
#[derive(Clone, Default)]
pub struct SyncInterceptors {
    conflict_handler: Option<Arc<dyn ConflictHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    observer: Option<Arc<dyn SyncObserver>>,
    retry_notifier: Option<RetryNotifier>,
}

impl SyncInterceptors {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a custom conflict handler, replacing the policy.
    pub fn with_conflict_handler(mut self, handler: impl ConflictHandler + 'static) -> Self {
        self.conflict_handler = Some(Arc::new(handler));
        self
    }

    /// Installs an error handler.
    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Installs a progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Installs a retry notifier.
    pub fn with_retry_notifier(
        mut self,
        notifier: impl Fn(&RetryAttempt) + Send + Sync + 'static,
    ) -> Self {
        self.retry_notifier = Some(Arc::new(notifier));
        self
    }

    /// Returns the custom resolution for `conflict`, if a handler is installed.
    pub(crate) fn resolve_conflict(&self, conflict: &SyncConflict) -> Option<ConflictResolution> {
        self.conflict_handler.as_ref().map(|h| h.resolve(conflict))
    }

    /// Classifies a failed row. Defaults to [`ErrorAction::Log`].
    pub(crate) fn classify_error(&self, error: &SyncRowError) -> ErrorAction {
        self.error_handler
            .as_ref()
            .map(|h| h.classify(error))
            .unwrap_or_default()
    }

    pub(crate) fn rows_applying(&self, table: &TableName, direction: ChangeDirection, rows: usize) {
        if let Some(observer) = &self.observer {
            observer.rows_applying(table, direction, rows);
        }
    }

    pub(crate) fn rows_applied(&self, changes: &TableChangesApplied) {
        if let Some(observer) = &self.observer {
            observer.rows_applied(changes);
        }
    }

    pub(crate) fn notify_retry(&self, attempt: &RetryAttempt) {
        if let Some(notifier) = &self.retry_notifier {
            notifier(attempt);
        }
    }
}

impl fmt::Debug for SyncInterceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInterceptors")
            .field("conflict_handler", &self.conflict_handler.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("observer", &self.observer.is_some())
            .field("retry_notifier", &self.retry_notifier.is_some())
            .finish()
    }
}
