//! Error types and SNAFU context selectors for the table store.
//!
//! `TableError` is the closed set of failures a [`crate::table::TableStore`]
//! operation can report. Load strategies branch on [`TableError::is_table_missing`]
//! and the orchestrator retries on [`TableError::is_retryable`].

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::{
    storage::StorageError,
    transaction_log::{CommitError, SchemaConvertError},
};

/// Errors from table store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// No table has been committed at the path.
    #[snafu(display("Table not found at {path}"))]
    TableMissing {
        /// Table path relative to the storage root.
        path: String,
    },

    /// The batch's columns diverge from the existing table.
    #[snafu(display("Schema conflict at {path}: {detail}"))]
    SchemaConflict {
        /// Table path relative to the storage root.
        path: String,
        /// First difference found.
        detail: String,
    },

    /// The batch uses column types the table format cannot record.
    #[snafu(display("Unsupported schema for {path}: {source}"))]
    UnsupportedSchema {
        /// Table path relative to the storage root.
        path: String,
        /// Underlying conversion error.
        source: SchemaConvertError,
    },

    /// A partition column is not present in the batch.
    #[snafu(display("Partition column {column} is missing from the batch written to {path}"))]
    PartitionColumnMissing {
        /// Table path relative to the storage root.
        path: String,
        /// Missing column.
        column: String,
    },

    /// The predicate cannot be used for this operation.
    #[snafu(display("Invalid predicate for {path}: {detail}"))]
    InvalidPredicate {
        /// Table path relative to the storage root.
        path: String,
        /// Why the predicate was rejected.
        detail: String,
    },

    /// Incoming rows fall outside the rows an overwrite replaces.
    #[snafu(display(
        "{rows} incoming rows for {path} do not satisfy the overwrite predicate {predicate}"
    ))]
    PredicateViolation {
        /// Table path relative to the storage root.
        path: String,
        /// Rendered predicate.
        predicate: String,
        /// Number of offending rows.
        rows: usize,
    },

    /// Several source rows of a merge share one join key.
    #[snafu(display("Merge into {path} has {duplicates} source rows with a duplicate key"))]
    AmbiguousMerge {
        /// Table path relative to the storage root.
        path: String,
        /// Number of source rows whose key was already seen.
        duplicates: usize,
    },

    /// Another writer committed first (stale expected version or the next
    /// commit file already exists).
    #[snafu(display("Concurrent write conflict at {path}: {source}"))]
    ConcurrentWriteConflict {
        /// Table path relative to the storage root.
        path: String,
        /// Underlying commit error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// The task driving a commit panicked or was shut down with the runtime.
    #[snafu(display("Commit task for {path} did not finish: {source}"))]
    CommitAborted {
        /// Table path relative to the storage root.
        path: String,
        /// Join failure of the commit task.
        source: tokio::task::JoinError,
    },

    /// Any other error from the transaction log.
    #[snafu(display("Transaction log error: {source}"))]
    TransactionLog {
        /// Underlying transaction log / commit error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// Storage error while reading or writing data files.
    #[snafu(display("Storage error while accessing table data: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// Parquet decode error while reading a data file.
    #[snafu(display("Parquet read error: {source}"))]
    ParquetRead {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Parquet encode error while writing a data file.
    #[snafu(display("Parquet write error: {source}"))]
    ParquetWrite {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Arrow compute or conversion error.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

impl TableError {
    /// Map a commit failure, separating lost races from other log errors.
    pub(crate) fn from_commit(path: &str, source: CommitError) -> Self {
        if source.is_conflict() {
            TableError::ConcurrentWriteConflict {
                path: path.to_string(),
                source,
            }
        } else {
            TableError::TransactionLog { source }
        }
    }

    /// True when the table does not exist yet.
    pub fn is_table_missing(&self) -> bool {
        matches!(self, TableError::TableMissing { .. })
    }

    /// True for failures worth retrying after reloading table state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TableError::ConcurrentWriteConflict { .. })
    }
}
