//! Row-level upsert (`MERGE INTO tgt USING src ON ...`).
//!
//! The predicate's `tgt.col = src.col` terms form the join key; its
//! `tgt.col = literal` terms restrict which target rows may match. Merges are
//! copy-on-write: a data file holding a matched row is rewritten without it,
//! and the replacing source rows are written as new files.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, BooleanArray, RecordBatch, UInt32Array},
    compute::{filter_record_batch, take_record_batch},
    row::{RowConverter, Rows, SortField},
};
use log::debug;
use snafu::prelude::*;

use crate::{
    predicate::Predicate,
    table::{
        TableStore, check_compatible,
        error::{AmbiguousMergeSnafu, ArrowSnafu, InvalidPredicateSnafu, TableError},
        scan, write,
    },
    transaction_log::{LogAction, Operation},
};

/// Which merge clauses run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// `WHEN MATCHED THEN UPDATE SET *`
    pub update_all: bool,
    /// `WHEN NOT MATCHED THEN INSERT *`
    pub insert_all: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            update_all: true,
            insert_all: true,
        }
    }
}

/// Outcome of [`TableStore::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Table version after the call (unchanged when nothing was written).
    pub version: u64,
    /// Rows in the source batch.
    pub num_source_rows: usize,
    /// Target rows replaced by a matching source row.
    pub num_target_rows_updated: usize,
    /// Source rows inserted without a match.
    pub num_target_rows_inserted: usize,
    /// Unmatched target rows copied into rewritten files.
    pub num_target_rows_copied: usize,
    /// Data files added.
    pub num_target_files_added: usize,
    /// Data files removed.
    pub num_target_files_removed: usize,
}

fn key_columns(batch: &RecordBatch, key_idx: &[usize]) -> Vec<ArrayRef> {
    key_idx.iter().map(|&i| Arc::clone(batch.column(i))).collect()
}

fn has_null_key(columns: &[ArrayRef], row: usize) -> bool {
    columns.iter().any(|c| c.is_null(row))
}

impl TableStore {
    /// Upsert `batch` into the table at `path`, joined on `predicate`.
    ///
    /// Matched target rows are replaced by their source row, unmatched source
    /// rows are inserted, unmatched target rows are untouched. Source rows
    /// with a null key never match. Fails with [`TableError::TableMissing`]
    /// when no table exists.
    pub async fn merge(
        &self,
        path: &str,
        batch: &RecordBatch,
        predicate: &Predicate,
        options: MergeOptions,
    ) -> Result<MergeStats, TableError> {
        let state = self.state(path).await?;
        check_compatible(path, &state.table_meta, batch, None)?;

        let keys = predicate.join_keys();
        ensure!(
            !keys.is_empty(),
            InvalidPredicateSnafu {
                path,
                detail: format!("{predicate} has no tgt.col = src.col term"),
            }
        );
        if let Some(column) = predicate
            .columns()
            .into_iter()
            .find(|c| !state.table_meta.schema.contains(c))
        {
            return InvalidPredicateSnafu {
                path,
                detail: format!("unknown column {column} in {predicate}"),
            }
            .fail();
        }

        let schema = state.arrow_schema();
        let source = write::conform_to_schema(batch, &schema)?;
        let partitions = &state.table_meta.partition_columns;
        let target_filter = predicate.target_filter();
        let location = self.location(path);

        let key_idx = keys
            .iter()
            .map(|k| schema.index_of(k))
            .collect::<Result<Vec<_>, _>>()
            .context(ArrowSnafu)?;
        let converter = RowConverter::new(
            key_idx
                .iter()
                .map(|&i| SortField::new(schema.field(i).data_type().clone()))
                .collect(),
        )
        .context(ArrowSnafu)?;

        let source_key_columns = key_columns(&source, &key_idx);
        let source_keys: Rows = converter
            .convert_columns(&source_key_columns)
            .context(ArrowSnafu)?;

        let mut source_index: HashMap<&[u8], usize> = HashMap::new();
        let mut duplicates = 0_usize;
        for row in 0..source.num_rows() {
            if has_null_key(&source_key_columns, row) {
                continue;
            }
            if source_index
                .insert(source_keys.row(row).data(), row)
                .is_some()
            {
                duplicates += 1;
            }
        }
        ensure!(duplicates == 0, AmbiguousMergeSnafu { path, duplicates });

        // Source values of key columns that are also partition columns; files
        // in other partitions cannot hold a match.
        let mut key_partition_values: BTreeMap<&str, HashSet<Option<String>>> = BTreeMap::new();
        for (key, column) in keys.iter().zip(&source_key_columns) {
            if !partitions.contains(key) {
                continue;
            }
            let values = key_partition_values.entry(key.as_str()).or_default();
            for row in 0..source.num_rows() {
                values.insert(write::partition_value_at(column.as_ref(), row)?);
            }
        }

        let mut stats = MergeStats {
            num_source_rows: source.num_rows(),
            ..MergeStats::default()
        };
        let mut actions = Vec::new();
        let mut source_matched = vec![false; source.num_rows()];

        for file in state.files.values() {
            if let Some(filter) = &target_filter {
                if filter.partition_verdict(partitions, &file.partition_values) == Some(false) {
                    continue;
                }
            }
            if key_partition_values
                .iter()
                .any(|(col, values)| !values.contains(&file.partition_values.get(*col).cloned()))
            {
                continue;
            }

            let target = scan::read_data_file_concat(&location, file, &schema).await?;
            let eligible = match &target_filter {
                Some(filter) => filter.row_mask(&target).context(ArrowSnafu)?,
                None => BooleanArray::from(vec![true; target.num_rows()]),
            };
            let target_key_columns = key_columns(&target, &key_idx);
            let target_keys = converter
                .convert_columns(&target_key_columns)
                .context(ArrowSnafu)?;

            let mut keep = Vec::with_capacity(target.num_rows());
            let mut hits = 0;
            for row in 0..target.num_rows() {
                let matched = eligible.value(row)
                    && !has_null_key(&target_key_columns, row)
                    && match source_index.get(target_keys.row(row).data()) {
                        Some(&src) => {
                            source_matched[src] = true;
                            true
                        }
                        None => false,
                    };
                if matched {
                    hits += 1;
                }
                keep.push(!matched);
            }

            if hits == 0 || !options.update_all {
                continue;
            }

            let survivors =
                filter_record_batch(&target, &BooleanArray::from(keep)).context(ArrowSnafu)?;
            stats.num_target_rows_updated += hits;
            stats.num_target_rows_copied += survivors.num_rows();
            stats.num_target_files_removed += 1;
            actions.push(LogAction::RemoveFile {
                path: file.path.clone(),
            });

            let rewritten = write::write_data_files(&location, partitions, &survivors).await?;
            stats.num_target_files_added += rewritten.len();
            actions.extend(rewritten.into_iter().map(LogAction::AddFile));
        }

        let mut take = Vec::new();
        for (row, matched) in source_matched.iter().enumerate() {
            if *matched {
                if options.update_all {
                    take.push(row as u32);
                }
            } else if options.insert_all {
                stats.num_target_rows_inserted += 1;
                take.push(row as u32);
            }
        }

        if !take.is_empty() {
            let rows = take_record_batch(&source, &UInt32Array::from(take)).context(ArrowSnafu)?;
            let files = write::write_data_files(&location, partitions, &rows).await?;
            stats.num_target_files_added += files.len();
            actions.extend(files.into_iter().map(LogAction::AddFile));
        }

        if actions.is_empty() {
            debug!("merge into {path} changed nothing");
            stats.version = state.version;
            return Ok(stats);
        }

        let operation = Operation::Merge {
            predicate: predicate.to_string(),
        };
        stats.version = self
            .commit(path, state.version, operation, actions)
            .await?;
        Ok(stats)
    }
}
