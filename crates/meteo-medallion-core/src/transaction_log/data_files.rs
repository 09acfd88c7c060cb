//! Data file entries tracked by the log.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One Parquet file that belongs to the table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataFile {
    /// Path relative to the table root, using `/` separators
    /// (for example `city=cordoba/part-<uuid>.parquet`).
    pub path: String,

    /// Partition column -> rendered value for every row in the file.
    #[serde(default)]
    pub partition_values: BTreeMap<String, String>,

    /// Number of rows stored in the file.
    pub row_count: u64,

    /// Encoded file size in bytes.
    pub size_bytes: u64,
}
