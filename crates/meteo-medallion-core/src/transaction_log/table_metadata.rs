//! Table-level metadata persisted in `UpdateTableMeta` actions.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction_log::logical_schema::LogicalSchema;

/// Schema and partitioning of a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableMeta {
    /// Column layout every data file follows.
    pub schema: LogicalSchema,

    /// Ordered partition columns; directories nest in this order.
    pub partition_columns: Vec<String>,

    /// When the table was first created.
    pub created_at: DateTime<Utc>,

    /// On-disk format version of this table.
    pub format_version: u32,
}

impl TableMeta {
    /// Format version written by this crate.
    pub const FORMAT_VERSION: u32 = 1;

    /// Metadata for a table created now.
    pub fn new(schema: LogicalSchema, partition_columns: Vec<String>) -> Self {
        Self {
            schema,
            partition_columns,
            created_at: Utc::now(),
            format_version: Self::FORMAT_VERSION,
        }
    }
}
