//! Configuration for the apply engine.

use rowsync_model::{ConflictResolutionPolicy, SyncSide};
use std::path::PathBuf;
use std::time::Duration;

/// Transaction scope used while applying a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// No explicit transaction; every statement auto-commits.
    None,
    /// One transaction per batch part.
    PerBatch,
    /// One transaction around the whole pass, retried on transient errors.
    AllOrNothing,
}

impl TransactionMode {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            TransactionMode::None => 0,
            TransactionMode::PerBatch => 1,
            TransactionMode::AllOrNothing => 2,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TransactionMode::None),
            1 => Some(TransactionMode::PerBatch),
            2 => Some(TransactionMode::AllOrNothing),
            _ => None,
        }
    }
}

/// Configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of rows submitted in one bulk operation.
    pub batch_size: usize,
    /// Whether to try bulk operations before falling back to single rows.
    pub use_bulk_operations: bool,
    /// Transaction scope.
    pub transaction_mode: TransactionMode,
    /// Policy used when no conflict handler is installed.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
    /// Which side of the star this engine runs on.
    pub side: SyncSide,
    /// Disable constraint checking while the incoming batch is applied.
    pub disable_constraints_on_apply: bool,
    /// Delete the incoming batch after a pass that left no errors.
    pub clean_folder: bool,
    /// Storage directory under which error batches are written.
    pub errors_directory: PathBuf,
    /// Maximum rows per part when writing error batches.
    pub max_rows_per_part: usize,
    /// Transient retry policy, used under [`TransactionMode::AllOrNothing`].
    pub retry: RetryConfig,
}

impl SyncOptions {
    /// Creates options for the given side, with defaults for everything else.
    pub fn new(side: SyncSide) -> Self {
        Self {
            batch_size: 1000,
            use_bulk_operations: true,
            transaction_mode: TransactionMode::AllOrNothing,
            conflict_resolution_policy: ConflictResolutionPolicy::ServerWins,
            side,
            disable_constraints_on_apply: false,
            clean_folder: true,
            errors_directory: PathBuf::from("errors"),
            max_rows_per_part: 5000,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the bulk chunk size. Zero is treated as one.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Enables or disables bulk operations.
    pub fn with_bulk_operations(mut self, enabled: bool) -> Self {
        self.use_bulk_operations = enabled;
        self
    }

    /// Sets the transaction mode.
    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// Sets the conflict resolution policy.
    pub fn with_conflict_resolution_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_resolution_policy = policy;
        self
    }

    /// Disables constraint checking around the incoming batch.
    pub fn with_constraints_disabled_on_apply(mut self, disabled: bool) -> Self {
        self.disable_constraints_on_apply = disabled;
        self
    }

    /// Controls deletion of the incoming batch after a clean pass.
    pub fn with_clean_folder(mut self, clean: bool) -> Self {
        self.clean_folder = clean;
        self
    }

    /// Sets the error batch directory.
    pub fn with_errors_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.errors_directory = directory.into();
        self
    }

    /// Sets the maximum rows per error batch part. Zero is treated as one.
    pub fn with_max_rows_per_part(mut self, rows: usize) -> Self {
        self.max_rows_per_part = rows.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new(SyncSide::Client)
    }
}

/// Linear backoff for transient failures.
///
/// The delay before attempt `n` (1-based retry count) is
/// `initial_delay * n`, capped at `max_delay`.
///
/// `max_attempts` of `None` retries until the pass succeeds, fails with a
/// non-transient error or is cancelled. This is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates an unbounded configuration.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Creates a configuration with at most `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::unbounded()
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns true if another attempt may follow `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }

    /// Calculates the delay before retry `retry` (1-based). Zero yields no delay.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        self.initial_delay
            .checked_mul(retry)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_options_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.batch_size, 1000);
        assert!(options.use_bulk_operations);
        assert_eq!(options.transaction_mode, TransactionMode::AllOrNothing);
        assert_eq!(
            options.conflict_resolution_policy,
            ConflictResolutionPolicy::ServerWins
        );
        assert_eq!(options.side, SyncSide::Client);
        assert!(options.clean_folder);
        assert_eq!(options.retry.max_attempts, None);
    }

    #[test]
    fn sync_options_builder() {
        let options = SyncOptions::new(SyncSide::Server)
            .with_batch_size(0)
            .with_bulk_operations(false)
            .with_transaction_mode(TransactionMode::PerBatch)
            .with_conflict_resolution_policy(ConflictResolutionPolicy::ClientWins)
            .with_errors_directory("errs")
            .with_max_rows_per_part(10);

        assert_eq!(options.batch_size, 1);
        assert!(!options.use_bulk_operations);
        assert_eq!(options.transaction_mode, TransactionMode::PerBatch);
        assert_eq!(options.side, SyncSide::Server);
        assert_eq!(options.errors_directory, PathBuf::from("errs"));
        assert_eq!(options.max_rows_per_part, 10);
    }

    #[test]
    fn transaction_mode_codes() {
        for code in 0..=2u8 {
            assert_eq!(TransactionMode::from_code(code).unwrap().to_code(), code);
        }
        assert_eq!(TransactionMode::from_code(3), None);
    }

    #[test]
    fn linear_backoff() {
        let config = RetryConfig::unbounded()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(350));
    }

    #[test]
    fn attempt_caps() {
        assert!(RetryConfig::unbounded().allows_another(1_000_000));
        let capped = RetryConfig::new(3);
        assert!(capped.allows_another(2));
        assert!(!capped.allows_another(3));
        assert!(!RetryConfig::no_retry().allows_another(1));
    }
}
