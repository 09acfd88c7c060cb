//! Idempotent write strategies against a medallion layer.
//!
//! A [`Loader`] binds a [`TableStore`] to one [`Layer`]; every strategy takes a
//! location (`forecast`, `weather_summary`, ...) and writes the table at
//! `{layer}/{location}`:
//!
//! - [`Loader::merge_upsert`]: row-level upsert; the table is created only
//!   when the merge reports it missing.
//! - [`Loader::delete_insert`]: delete the rows sharing the batch's key, then
//!   append. Two commits, so not atomic: a failure between them leaves the
//!   key's rows deleted until the next run.
//! - [`Loader::insert_overwrite`]: replace the partition the batch belongs to
//!   in one commit. Preferred wherever the batch maps to a partition.
use std::fmt;

use arrow::array::RecordBatch;
use log::{info, warn};
use snafu::prelude::*;

use crate::{
    batch,
    predicate::{Literal, Predicate},
    table::{MergeOptions, TableError, TableStore},
};

/// Medallion layer; each maps to a top-level directory under the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// As extracted (`bronze`).
    Raw,
    /// Aggregated and derived (`silver`).
    Enriched,
    /// Joined and scored (`gold`).
    Curated,
}

impl Layer {
    /// Directory name of the layer.
    pub fn dir(self) -> &'static str {
        match self {
            Layer::Raw => "bronze",
            Layer::Enriched => "silver",
            Layer::Curated => "gold",
        }
    }

    /// Table path of `location` within this layer.
    pub fn table_path(self, location: &str) -> String {
        format!("{}/{location}", self.dir())
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// Errors raised by the load strategies.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LoadError {
    /// Partition or filter columns do not fit the batch.
    #[snafu(display("Invalid partition spec for {path}: {detail}"))]
    InvalidPartitionSpec {
        /// Table path.
        path: String,
        /// What is wrong with the partition spec.
        detail: String,
    },

    /// A column the strategy keys on is not in the batch.
    #[snafu(display("Column {column} is missing from the batch loaded into {path}"))]
    MissingColumn {
        /// Table path.
        path: String,
        /// Missing column.
        column: String,
    },

    /// The strategy needs a first row to derive its key.
    #[snafu(display("Cannot load an empty batch into {path} with {strategy}"))]
    EmptyBatch {
        /// Table path.
        path: String,
        /// Strategy that was called.
        strategy: LoadStrategy,
    },

    /// The first row's key value is null.
    #[snafu(display("Key column {column} is null in the first row loaded into {path}"))]
    NullKey {
        /// Table path.
        path: String,
        /// Key column.
        column: String,
    },

    /// The key value could not be read from the batch.
    #[snafu(display("Cannot read key column {column} for {path}: {source}"))]
    KeyValue {
        /// Table path.
        path: String,
        /// Key column.
        column: String,
        /// Underlying Arrow error.
        source: arrow::error::ArrowError,
    },

    /// The table store rejected the write.
    #[snafu(display("Table store error while loading {path}: {source}"))]
    Table {
        /// Table path.
        path: String,
        /// Underlying table error.
        #[snafu(source, backtrace)]
        source: TableError,
    },
}

impl LoadError {
    /// True when retrying the load may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::Table { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Write policy used for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Merge on a key predicate, creating the table when missing.
    MergeUpsert,
    /// Delete rows sharing the batch key, then append.
    DeleteInsert,
    /// Replace the batch's partition.
    InsertOverwrite,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::MergeUpsert => write!(f, "merge-upsert"),
            LoadStrategy::DeleteInsert => write!(f, "delete-insert"),
            LoadStrategy::InsertOverwrite => write!(f, "insert-overwrite"),
        }
    }
}

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Table path written.
    pub path: String,
    /// Strategy used.
    pub strategy: LoadStrategy,
    /// Table version after the load.
    pub version: u64,
    /// Rows written by the load.
    pub rows_written: usize,
    /// Whether the load created the table.
    pub created: bool,
}

/// Load strategies bound to one layer of a table store.
#[derive(Debug, Clone)]
pub struct Loader {
    store: TableStore,
    layer: Layer,
}

impl Loader {
    /// Loader writing into `layer` of `store`.
    pub fn new(store: TableStore, layer: Layer) -> Self {
        Self { store, layer }
    }

    /// The layer this loader writes to.
    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// The underlying table store.
    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Merge `batch` into `{layer}/{location}` on `predicate`.
    ///
    /// Matched rows are replaced, unmatched source rows inserted. Only a
    /// [`TableError::TableMissing`] falls back to creating the table; schema
    /// conflicts and concurrent-write conflicts propagate.
    pub async fn merge_upsert(
        &self,
        location: &str,
        batch: &RecordBatch,
        partition_by: &[&str],
        predicate: &Predicate,
    ) -> Result<LoadReport, LoadError> {
        let path = self.layer.table_path(location);

        match self
            .store
            .merge(&path, batch, predicate, MergeOptions::default())
            .await
        {
            Ok(stats) => {
                info!(
                    "merged {} rows into {path} on {predicate}: {} updated, {} inserted",
                    stats.num_source_rows,
                    stats.num_target_rows_updated,
                    stats.num_target_rows_inserted
                );
                Ok(LoadReport {
                    path,
                    strategy: LoadStrategy::MergeUpsert,
                    version: stats.version,
                    rows_written: stats.num_target_rows_updated + stats.num_target_rows_inserted,
                    created: false,
                })
            }
            Err(e) if e.is_table_missing() => {
                info!("{path} does not exist yet; creating it");
                let version = self
                    .store
                    .create(&path, batch, partition_by)
                    .await
                    .context(TableSnafu { path: path.clone() })?;
                Ok(LoadReport {
                    path,
                    strategy: LoadStrategy::MergeUpsert,
                    version,
                    rows_written: batch.num_rows(),
                    created: true,
                })
            }
            Err(source) => Err(LoadError::Table { path, source }),
        }
    }

    /// Delete every row whose `filter_col` equals the batch's first-row value,
    /// then append the batch.
    pub async fn delete_insert(
        &self,
        location: &str,
        batch: &RecordBatch,
        partition_by: &[&str],
        filter_col: &str,
    ) -> Result<LoadReport, LoadError> {
        let path = self.layer.table_path(location);
        if !partition_by.contains(&filter_col) {
            warn!("delete-insert on {path} filters on {filter_col}, which is not a partition column");
        }
        let filter_value = self.first_row_key(&path, batch, filter_col, LoadStrategy::DeleteInsert)?;

        let existed = self
            .store
            .exists(&path)
            .await
            .context(TableSnafu { path: path.clone() })?;
        if existed {
            let predicate = Predicate::eq(filter_col, filter_value.clone());
            let stats = self
                .store
                .delete(&path, &predicate)
                .await
                .context(TableSnafu { path: path.clone() })?;
            if stats.num_deleted_rows > 0 {
                info!(
                    "removed {} existing rows from {path} where {predicate}",
                    stats.num_deleted_rows
                );
            } else {
                info!("no existing rows in {path} where {predicate}");
            }
        }

        let version = self
            .store
            .append(&path, batch, partition_by)
            .await
            .context(TableSnafu { path: path.clone() })?;

        Ok(LoadReport {
            path,
            strategy: LoadStrategy::DeleteInsert,
            version,
            rows_written: batch.num_rows(),
            created: !existed,
        })
    }

    /// Replace the partition identified by the batch's first-row values of
    /// `filter_cols`.
    ///
    /// Fails with [`LoadError::InvalidPartitionSpec`] before any I/O unless
    /// `partition_by` is non-empty, fully present in the batch and a proper
    /// subset of its columns, and every filter column is a partition column.
    pub async fn insert_overwrite(
        &self,
        location: &str,
        batch: &RecordBatch,
        partition_by: &[&str],
        filter_cols: &[&str],
    ) -> Result<LoadReport, LoadError> {
        let path = self.layer.table_path(location);
        validate_partition_spec(&path, batch, partition_by, filter_cols)?;

        let mut predicate = Predicate::And(Vec::with_capacity(filter_cols.len()));
        for column in filter_cols {
            let value = self.first_row_key(&path, batch, column, LoadStrategy::InsertOverwrite)?;
            predicate = predicate.and(Predicate::eq(*column, value));
        }

        let created = !self
            .store
            .exists(&path)
            .await
            .context(TableSnafu { path: path.clone() })?;
        let version = self
            .store
            .overwrite(&path, batch, partition_by, &predicate)
            .await
            .context(TableSnafu { path: path.clone() })?;

        info!("overwrote {path} where {predicate} with {} rows", batch.num_rows());
        Ok(LoadReport {
            path,
            strategy: LoadStrategy::InsertOverwrite,
            version,
            rows_written: batch.num_rows(),
            created,
        })
    }

    fn first_row_key(
        &self,
        path: &str,
        batch: &RecordBatch,
        column: &str,
        strategy: LoadStrategy,
    ) -> Result<Literal, LoadError> {
        ensure!(batch.num_rows() > 0, EmptyBatchSnafu { path, strategy });
        ensure!(
            batch.schema().column_with_name(column).is_some(),
            MissingColumnSnafu { path, column }
        );
        batch::first_value(batch, column)
            .context(KeyValueSnafu { path, column })?
            .context(NullKeySnafu { path, column })
    }
}

/// Check the partition spec of an insert-overwrite.
pub fn validate_partition_spec(
    path: &str,
    batch: &RecordBatch,
    partition_by: &[&str],
    filter_cols: &[&str],
) -> Result<(), LoadError> {
    let schema = batch.schema();

    ensure!(
        !partition_by.is_empty(),
        InvalidPartitionSpecSnafu {
            path,
            detail: "partition_by is empty",
        }
    );
    if let Some(missing) = partition_by
        .iter()
        .find(|p| schema.column_with_name(p).is_none())
    {
        return InvalidPartitionSpecSnafu {
            path,
            detail: format!("partition column {missing} is not in the batch"),
        }
        .fail();
    }
    ensure!(
        partition_by.len() < schema.fields().len(),
        InvalidPartitionSpecSnafu {
            path,
            detail: "partition_by must leave at least one data column",
        }
    );
    ensure!(
        !filter_cols.is_empty(),
        InvalidPartitionSpecSnafu {
            path,
            detail: "no filter column given",
        }
    );
    if let Some(stray) = filter_cols.iter().find(|f| !partition_by.contains(f)) {
        return InvalidPartitionSpecSnafu {
            path,
            detail: format!("filter column {stray} is not a partition column"),
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };

    fn batch() -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("v", DataType::Int64, true),
                Field::new("date_retrieved", DataType::Utf8, true),
                Field::new("city", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec!["2024-01-01"])),
                Arc::new(StringArray::from(vec!["cordoba"])),
            ],
        )
        .expect("valid batch")
    }

    #[test]
    fn layer_paths_use_medallion_directories() {
        assert_eq!(Layer::Raw.table_path("forecast"), "bronze/forecast");
        assert_eq!(Layer::Enriched.table_path("weather_summary"), "silver/weather_summary");
        assert_eq!(Layer::Curated.to_string(), "gold");
    }

    #[test]
    fn partition_spec_accepts_proper_subsets() {
        let ok = validate_partition_spec(
            "t",
            &batch(),
            &["date_retrieved", "city"],
            &["date_retrieved", "city"],
        );

        assert!(ok.is_ok());
    }

    #[test]
    fn partition_spec_rejects_bad_specs() {
        let b = batch();
        let cases: [(&[&str], &[&str]); 5] = [
            (&[], &["city"]),
            (&["country"], &["country"]),
            (&["v", "date_retrieved", "city"], &["city"]),
            (&["city"], &[]),
            (&["city"], &["date_retrieved"]),
        ];

        for (partition_by, filter_cols) in cases {
            let err = validate_partition_spec("t", &b, partition_by, filter_cols)
                .expect_err("invalid partition spec");
            assert!(
                matches!(err, LoadError::InvalidPartitionSpec { .. }),
                "{partition_by:?} / {filter_cols:?}: {err}"
            );
        }
    }
}
