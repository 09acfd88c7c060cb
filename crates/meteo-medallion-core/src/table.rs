//! Table layer: the transactional, partitioned table store.
//!
//! [`TableStore`] addresses tables by a path relative to a storage root
//! (`bronze/forecast`, `silver/weather_summary`, ...). Each table is a
//! transaction log plus Hive-partitioned Parquet files; every mutating call
//! writes its new data files first and then publishes them with a single
//! optimistic commit, so a call either becomes visible as a whole or not at
//! all.
//!
//! Operations:
//! - [`TableStore::exists`], [`TableStore::version`], [`TableStore::read`]
//! - [`TableStore::create`], [`TableStore::append`]
//! - [`TableStore::overwrite`], [`TableStore::delete`] (see `overwrite.rs`)
//! - [`TableStore::merge`] (see `merge.rs`)

pub mod error;
mod merge;
mod overwrite;
mod scan;
mod write;

pub use error::TableError;
pub use merge::{MergeOptions, MergeStats};
pub use overwrite::DeleteStats;

use arrow::array::RecordBatch;
use log::info;
use snafu::prelude::*;

use crate::{
    storage::{StorageLocation, TableLocation},
    table::error::{
        CommitAbortedSnafu, PartitionColumnMissingSnafu, SchemaConflictSnafu, TransactionLogSnafu,
        UnsupportedSchemaSnafu,
    },
    transaction_log::{
        ConflictSnafu, LogAction, LogicalSchema, Operation, TableMeta, TableState,
        TransactionLogStore,
    },
};

/// Partitioned, versioned tables under one storage root.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: StorageLocation,
}

impl TableStore {
    /// Store rooted at `root`.
    pub fn new(root: StorageLocation) -> Self {
        Self { root }
    }

    /// The storage root.
    pub fn root(&self) -> &StorageLocation {
        &self.root
    }

    /// Location of the table at `path`.
    pub fn location(&self, path: &str) -> TableLocation {
        TableLocation::under(&self.root, path)
    }

    fn log(&self, path: &str) -> TransactionLogStore {
        TransactionLogStore::new(self.location(path))
    }

    /// Current committed version of the table; 0 when it does not exist.
    pub async fn version(&self, path: &str) -> Result<u64, TableError> {
        self.log(path)
            .load_current_version()
            .await
            .context(TransactionLogSnafu)
    }

    /// Whether a table has been committed at `path`.
    pub async fn exists(&self, path: &str) -> Result<bool, TableError> {
        Ok(self.version(path).await? > 0)
    }

    async fn try_state(&self, path: &str) -> Result<Option<TableState>, TableError> {
        let log = self.log(path);
        let version = log.load_current_version().await.context(TransactionLogSnafu)?;
        if version == 0 {
            return Ok(None);
        }
        let state = log
            .rebuild_table_state_at(version)
            .await
            .context(TransactionLogSnafu)?;
        Ok(Some(state))
    }

    /// Metadata and live files of the table.
    ///
    /// Fails with [`TableError::TableMissing`] if no table exists.
    pub async fn state(&self, path: &str) -> Result<TableState, TableError> {
        match self.try_state(path).await? {
            Some(state) => Ok(state),
            None => error::TableMissingSnafu { path }.fail(),
        }
    }

    /// Materialize every row of the table as one batch.
    ///
    /// Fails with [`TableError::TableMissing`] if no table exists.
    pub async fn read(&self, path: &str) -> Result<RecordBatch, TableError> {
        let state = self.state(path).await?;
        scan::read_all(&self.location(path), &state).await
    }

    /// Create the table from its first batch.
    ///
    /// Fails with [`TableError::ConcurrentWriteConflict`] when a table already
    /// exists at `path`.
    pub async fn create(
        &self,
        path: &str,
        batch: &RecordBatch,
        partition_by: &[&str],
    ) -> Result<u64, TableError> {
        let found = self.version(path).await?;
        if found != 0 {
            let source = ConflictSnafu {
                expected: 0_u64,
                found,
            }
            .build();
            return Err(TableError::from_commit(path, source));
        }

        let partition_columns = partition_columns_of(path, batch, partition_by)?;
        let meta = new_table_meta(path, batch, partition_columns)?;
        self.write_new_table(path, meta, batch, Operation::Create)
            .await
    }

    /// Add rows without touching existing ones; creates the table if absent.
    pub async fn append(
        &self,
        path: &str,
        batch: &RecordBatch,
        partition_by: &[&str],
    ) -> Result<u64, TableError> {
        let partition_columns = partition_columns_of(path, batch, partition_by)?;

        let Some(state) = self.try_state(path).await? else {
            let meta = new_table_meta(path, batch, partition_columns)?;
            return self
                .write_new_table(path, meta, batch, Operation::Append)
                .await;
        };

        check_compatible(path, &state.table_meta, batch, Some(&partition_columns))?;
        let batch = write::conform_to_schema(batch, &state.arrow_schema())?;
        let files =
            write::write_data_files(&self.location(path), &partition_columns, &batch).await?;
        let actions = files.into_iter().map(LogAction::AddFile).collect();

        self.commit(path, state.version, Operation::Append, actions)
            .await
    }

    async fn write_new_table(
        &self,
        path: &str,
        meta: TableMeta,
        batch: &RecordBatch,
        operation: Operation,
    ) -> Result<u64, TableError> {
        let schema = meta.schema.to_arrow_schema_ref();
        let batch = write::conform_to_schema(batch, &schema)?;
        let files =
            write::write_data_files(&self.location(path), &meta.partition_columns, &batch).await?;

        let mut actions = vec![LogAction::UpdateTableMeta(meta)];
        actions.extend(files.into_iter().map(LogAction::AddFile));
        self.commit(path, 0, operation, actions).await
    }

    async fn commit(
        &self,
        path: &str,
        expected: u64,
        operation: Operation,
        actions: Vec<LogAction>,
    ) -> Result<u64, TableError> {
        let rendered = operation.to_string();
        // Runs detached: dropping the caller (a timeout, for one) must not
        // stop between the commit file and the CURRENT update.
        let log = self.log(path);
        let version = tokio::spawn(async move {
            log.commit_with_expected_version(expected, operation, actions)
                .await
        })
        .await
        .context(CommitAbortedSnafu { path })?
        .map_err(|e| TableError::from_commit(path, e))?;

        info!("committed {path} version {version}: {rendered}");
        Ok(version)
    }
}

/// Resolve partition columns, checking each is a column of the batch.
fn partition_columns_of(
    path: &str,
    batch: &RecordBatch,
    partition_by: &[&str],
) -> Result<Vec<String>, TableError> {
    let schema = batch.schema();
    partition_by
        .iter()
        .map(|column| {
            ensure!(
                schema.column_with_name(column).is_some(),
                PartitionColumnMissingSnafu { path, column: *column }
            );
            Ok(column.to_string())
        })
        .collect()
}

fn new_table_meta(
    path: &str,
    batch: &RecordBatch,
    partition_columns: Vec<String>,
) -> Result<TableMeta, TableError> {
    let schema = LogicalSchema::from_arrow(&batch.schema())
        .context(UnsupportedSchemaSnafu { path })?
        .with_all_nullable();
    Ok(TableMeta::new(schema, partition_columns))
}

/// Check a batch (and, for partitioned writes, its partitioning) against an
/// existing table.
fn check_compatible(
    path: &str,
    meta: &TableMeta,
    batch: &RecordBatch,
    partition_columns: Option<&[String]>,
) -> Result<(), TableError> {
    let incoming =
        LogicalSchema::from_arrow(&batch.schema()).context(UnsupportedSchemaSnafu { path })?;
    if let Some(detail) = meta.schema.mismatch(&incoming) {
        return SchemaConflictSnafu { path, detail }.fail();
    }

    if let Some(partition_columns) = partition_columns {
        ensure!(
            partition_columns == meta.partition_columns.as_slice(),
            SchemaConflictSnafu {
                path,
                detail: format!(
                    "partition columns differ: table has {:?}, write has {:?}",
                    meta.partition_columns, partition_columns
                ),
            }
        );
    }
    Ok(())
}
