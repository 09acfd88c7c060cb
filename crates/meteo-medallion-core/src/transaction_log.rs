//! Append-only metadata log and table state.
//!
//! Every medallion dataset keeps a small Delta-inspired commit log next to its
//! Parquet files:
//!
//! - an append-only sequence of JSON commits stored under `_medallion_log/`
//!   (for example `_medallion_log/0000000001.json`);
//! - a `CURRENT` pointer that tracks the latest committed version;
//! - an optimistic concurrency guard: a commit names the version it was
//!   prepared against and fails cleanly when another writer got there first.
//!
//! A [`TableState`] is materialized by replaying commits `1..=CURRENT`, which
//! yields the table metadata (schema, partition columns) and the set of live
//! data files.
//!
//! ## On-disk layout
//!
//! ```text
//! bronze/forecast/
//!   _medallion_log/
//!     CURRENT                      # latest committed version (e.g. "3\n")
//!     0000000001.json              # Commit version 1
//!     0000000002.json              # Commit version 2
//!   date_retrieved=2024-01-01/
//!     city=cordoba/
//!       part-<uuid>.parquet
//! ```
//!
//! Each `*.json` file contains a single [`Commit`]:
//!
//! ```json
//! {
//!   "version": 2,
//!   "base_version": 1,
//!   "timestamp": "2024-01-01T03:00:00Z",
//!   "operation": { "Overwrite": { "predicate": "tgt.city = 'cordoba'" } },
//!   "actions": [
//!     { "RemoveFile": { "path": "city=cordoba/part-aaaa.parquet" } },
//!     { "AddFile": { "path": "city=cordoba/part-bbbb.parquet", "partition_values": { "city": "cordoba" }, "row_count": 24, "size_bytes": 4096 } }
//!   ]
//! }
//! ```
//!
//! Data files written before a failed commit are never referenced by the log
//! and are ignored by readers.
pub mod actions;
pub mod data_files;
pub mod log_store;
pub mod logical_schema;
pub mod table_metadata;
pub mod table_state;

pub use actions::{Commit, LogAction, Operation};
pub use data_files::DataFile;
pub use log_store::TransactionLogStore;
pub use logical_schema::{LogicalDataType, LogicalField, LogicalSchema, SchemaConvertError};
pub use table_metadata::TableMeta;
pub use table_state::TableState;

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Errors that can occur while reading or writing the commit log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommitError {
    /// The caller's expected_version does not match the CURRENT pointer.
    #[snafu(display("Commit conflict: expected version {expected}, but CURRENT is {found}"))]
    Conflict {
        /// The version the caller expected to be current.
        expected: u64,
        /// The actual current version found.
        found: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error while working with the log or CURRENT file.
    #[snafu(display("Storage error while accessing commit log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The log or CURRENT file is in an unexpected / malformed state.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

impl CommitError {
    /// True when another writer committed first: either CURRENT moved past the
    /// expected version or the commit file for the next version already exists.
    pub fn is_conflict(&self) -> bool {
        match self {
            CommitError::Conflict { .. } => true,
            CommitError::Storage { source } => source.is_already_exists(),
            CommitError::CorruptState { .. } => false,
        }
    }
}
