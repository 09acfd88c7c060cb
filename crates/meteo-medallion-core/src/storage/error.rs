use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

/// Errors produced by a storage backend implementation.
///
/// Backend-specific failures are wrapped in this enum so higher layers can map
/// them into [`StorageError`] variants with additional context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
    /// An error reported by an object store (S3 or compatible).
    Object(object_store::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
            BackendError::Object(e) => write!(f, "object store error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
            BackendError::Object(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that was found to already exist.
        path: String,
        /// Underlying backend error that indicates the existing resource.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Create-only semantics were detected by a probe rather than the backend.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExistsNoSource {
        /// The path that was found to already exist.
        path: String,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Any other backend failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the error occurred.
        path: String,
        /// Underlying backend error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// True for both flavours of "path already exists".
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StorageError::AlreadyExists { .. } | StorageError::AlreadyExistsNoSource { .. }
        )
    }

    /// True when the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
