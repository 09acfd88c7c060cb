//! Log actions and commit payload definitions.
//!
//! Each commit file stores a [`Commit`] containing ordered [`LogAction`] values
//! that mutate table state (adding or removing data files, replacing table
//! metadata) plus the [`Operation`] that produced them.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction_log::{data_files::DataFile, table_metadata::TableMeta};

/// An action recorded in a commit.
///
/// Actions are applied in order to evolve table state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogAction {
    /// Add a data file. A file with the same path replaces the previous entry.
    AddFile(DataFile),

    /// Remove a data file by its table-relative path.
    RemoveFile {
        /// Table-relative path of the file to remove.
        path: String,
    },

    /// Replace table-level metadata.
    UpdateTableMeta(TableMeta),
}

/// The table operation a commit records.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    /// First write of a table.
    Create,
    /// Rows added without touching existing ones.
    Append,
    /// Rows selected by `predicate` replaced by the incoming batch.
    Overwrite {
        /// Rendered predicate text.
        predicate: String,
    },
    /// Rows selected by `predicate` removed.
    Delete {
        /// Rendered predicate text.
        predicate: String,
    },
    /// Row-level upsert joined on `predicate`.
    Merge {
        /// Rendered predicate text.
        predicate: String,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Append => write!(f, "APPEND"),
            Operation::Overwrite { predicate } => write!(f, "OVERWRITE WHERE {predicate}"),
            Operation::Delete { predicate } => write!(f, "DELETE WHERE {predicate}"),
            Operation::Merge { predicate } => write!(f, "MERGE ON {predicate}"),
        }
    }
}

/// A single, immutable commit in the metadata log.
///
/// Commits are written to files such as `_medallion_log/0000000001.json`.
/// The version field must match the file name; `base_version` records what
/// the writer believed was the current version when the commit was prepared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    /// The version number of this commit (monotonic, starting from 1).
    pub version: u64,

    /// The version the writer believed was current when preparing this
    /// commit. Used by the OCC layer as a guard.
    pub base_version: u64,

    /// Commit creation timestamp, stored as RFC3339 UTC.
    pub timestamp: DateTime<Utc>,

    /// Operation that produced the actions.
    pub operation: Operation,

    /// Ordered list of actions that describe how table state changes in this commit.
    pub actions: Vec<LogAction>,
}
