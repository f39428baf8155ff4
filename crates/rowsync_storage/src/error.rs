//! Error types for batch storage.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing batch parts.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The part file is truncated or otherwise unreadable.
    #[error("batch part corrupted: {0}")]
    Corrupted(String),

    /// A frame failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// The part does not exist.
    #[error("batch part not found: {}", path.display())]
    PartNotFound {
        /// Path of the missing part.
        path: PathBuf,
    },

    /// The part was written by an unsupported format version.
    #[error("unsupported batch part version {0}")]
    UnsupportedVersion(u16),
}

impl StorageError {
    /// Creates a codec error.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec(message.to_string())
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
