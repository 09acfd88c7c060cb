//! Predicate-scoped replacement and deletion.
//!
//! Both operations first plan which live files the predicate touches:
//! files whose partition values decide the predicate are dropped or kept
//! wholesale, the rest are read and rewritten without the matching rows.
//! The plan and any new files are published in one commit.
use arrow::{
    array::RecordBatch,
    compute::{filter_record_batch, not},
};
use snafu::prelude::*;

use crate::{
    predicate::Predicate,
    storage::TableLocation,
    table::{
        TableStore, check_compatible,
        error::{ArrowSnafu, InvalidPredicateSnafu, PredicateViolationSnafu, TableError},
        new_table_meta, partition_columns_of, scan, write,
    },
    transaction_log::{LogAction, Operation, TableState},
};

/// Outcome of [`TableStore::delete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteStats {
    /// Table version after the call (unchanged when nothing matched).
    pub version: u64,
    /// Rows removed.
    pub num_deleted_rows: u64,
    /// Data files removed.
    pub num_removed_files: usize,
    /// Data files written to hold surviving rows of rewritten files.
    pub num_added_files: usize,
}

#[derive(Debug, Default)]
struct RemovalPlan {
    actions: Vec<LogAction>,
    rows_removed: u64,
    files_removed: usize,
    files_added: usize,
}

/// Reject predicates that reference the source alias or unknown columns.
fn ensure_target_only(
    path: &str,
    predicate: &Predicate,
    has_column: impl Fn(&str) -> bool,
) -> Result<(), TableError> {
    ensure!(
        predicate.join_keys().is_empty(),
        InvalidPredicateSnafu {
            path,
            detail: format!("{predicate} references the source alias"),
        }
    );
    if let Some(column) = predicate.columns().into_iter().find(|c| !has_column(c)) {
        return InvalidPredicateSnafu {
            path,
            detail: format!("unknown column {column} in {predicate}"),
        }
        .fail();
    }
    Ok(())
}

async fn plan_removal(
    location: &TableLocation,
    state: &TableState,
    predicate: &Predicate,
) -> Result<RemovalPlan, TableError> {
    let schema = state.arrow_schema();
    let partitions = &state.table_meta.partition_columns;
    let mut plan = RemovalPlan::default();

    for file in state.files.values() {
        match predicate.partition_verdict(partitions, &file.partition_values) {
            Some(false) => continue,
            Some(true) => {
                plan.rows_removed += file.row_count;
            }
            None => {
                let batch = scan::read_data_file_concat(location, file, &schema).await?;
                let mask = predicate.row_mask(&batch).context(ArrowSnafu)?;
                let hits = mask.true_count();
                if hits == 0 {
                    continue;
                }
                plan.rows_removed += hits as u64;

                let keep_mask = not(&mask).context(ArrowSnafu)?;
                let keep = filter_record_batch(&batch, &keep_mask).context(ArrowSnafu)?;
                let rewritten = write::write_data_files(location, partitions, &keep).await?;
                plan.files_added += rewritten.len();
                plan.actions
                    .extend(rewritten.into_iter().map(LogAction::AddFile));
            }
        }
        plan.files_removed += 1;
        plan.actions.push(LogAction::RemoveFile {
            path: file.path.clone(),
        });
    }

    Ok(plan)
}

impl TableStore {
    /// Atomically replace the rows selected by `predicate` with `batch`.
    ///
    /// Every incoming row must satisfy the predicate
    /// ([`TableError::PredicateViolation`] otherwise), so repeating the call
    /// with the same batch yields the same table content. Creates the table
    /// if absent.
    pub async fn overwrite(
        &self,
        path: &str,
        batch: &RecordBatch,
        partition_by: &[&str],
        predicate: &Predicate,
    ) -> Result<u64, TableError> {
        let partition_columns = partition_columns_of(path, batch, partition_by)?;
        let batch_schema = batch.schema();
        ensure_target_only(path, predicate, |c| {
            batch_schema.column_with_name(c).is_some()
        })?;

        let mask = predicate.row_mask(batch).context(ArrowSnafu)?;
        let violating = batch.num_rows() - mask.true_count();
        ensure!(
            violating == 0,
            PredicateViolationSnafu {
                path,
                predicate: predicate.to_string(),
                rows: violating,
            }
        );

        let operation = Operation::Overwrite {
            predicate: predicate.to_string(),
        };

        let Some(state) = self.try_state(path).await? else {
            let meta = new_table_meta(path, batch, partition_columns)?;
            return self.write_new_table(path, meta, batch, operation).await;
        };

        check_compatible(path, &state.table_meta, batch, Some(&partition_columns))?;
        let location = self.location(path);
        let batch = write::conform_to_schema(batch, &state.arrow_schema())?;

        let mut plan = plan_removal(&location, &state, predicate).await?;
        let files = write::write_data_files(&location, &partition_columns, &batch).await?;
        plan.actions.extend(files.into_iter().map(LogAction::AddFile));

        self.commit(path, state.version, operation, plan.actions)
            .await
    }

    /// Remove the rows selected by `predicate`.
    ///
    /// Fails with [`TableError::TableMissing`] if no table exists. No commit
    /// is made when nothing matches.
    pub async fn delete(&self, path: &str, predicate: &Predicate) -> Result<DeleteStats, TableError> {
        let state = self.state(path).await?;
        ensure_target_only(path, predicate, |c| state.table_meta.schema.contains(c))?;

        let location = self.location(path);
        let plan = plan_removal(&location, &state, predicate).await?;
        if plan.files_removed == 0 {
            return Ok(DeleteStats {
                version: state.version,
                ..DeleteStats::default()
            });
        }

        let operation = Operation::Delete {
            predicate: predicate.to_string(),
        };
        let version = self
            .commit(path, state.version, operation, plan.actions)
            .await?;

        Ok(DeleteStats {
            version,
            num_deleted_rows: plan.rows_removed,
            num_removed_files: plan.files_removed,
            num_added_files: plan.files_added,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::StorageLocation;
    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn rows(day: &str, city: &str, values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("v", DataType::Int64, true),
            Field::new("date_retrieved", DataType::Utf8, true),
            Field::new("city", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(values.to_vec())),
                Arc::new(StringArray::from(vec![day; values.len()])),
                Arc::new(StringArray::from(vec![city; values.len()])),
            ],
        )
        .expect("valid batch")
    }

    fn scope(day: &str, city: &str) -> Predicate {
        Predicate::eq("date_retrieved", day).and(Predicate::eq("city", city))
    }

    const PARTITIONS: [&str; 2] = ["date_retrieved", "city"];

    #[tokio::test]
    async fn overwrite_replaces_only_the_selected_partition() -> TestResult {
        let tmp = TempDir::new()?;
        let store = TableStore::new(StorageLocation::local(tmp.path()));
        store
            .overwrite("t", &rows("d1", "cordoba", &[1, 2]), &PARTITIONS, &scope("d1", "cordoba"))
            .await?;
        store
            .overwrite("t", &rows("d1", "rosario", &[3]), &PARTITIONS, &scope("d1", "rosario"))
            .await?;

        store
            .overwrite("t", &rows("d1", "cordoba", &[9]), &PARTITIONS, &scope("d1", "cordoba"))
            .await?;

        let state = store.state("t").await?;
        assert_eq!(state.files.len(), 2);
        assert_eq!(state.row_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_rejects_rows_outside_the_predicate() -> TestResult {
        let tmp = TempDir::new()?;
        let store = TableStore::new(StorageLocation::local(tmp.path()));

        let err = store
            .overwrite("t", &rows("d1", "rosario", &[1]), &PARTITIONS, &scope("d1", "cordoba"))
            .await
            .expect_err("row outside predicate");

        assert!(matches!(err, TableError::PredicateViolation { rows: 1, .. }));
        assert!(!store.exists("t").await?);
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_on_non_partition_column_rewrites_rows() -> TestResult {
        let tmp = TempDir::new()?;
        let store = TableStore::new(StorageLocation::local(tmp.path()));
        store.append("t", &rows("d1", "cordoba", &[1, 2, 3]), &["city"]).await?;

        store
            .overwrite("t", &rows("d1", "cordoba", &[2]), &["city"], &Predicate::eq("v", 2_i64))
            .await?;

        let all = store.read("t").await?;
        let v = all
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64");
        let mut values: Vec<i64> = v.iter().flatten().collect();
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_matching_rows_and_reports_stats() -> TestResult {
        let tmp = TempDir::new()?;
        let store = TableStore::new(StorageLocation::local(tmp.path()));
        store.append("t", &rows("d1", "cordoba", &[1, 2]), &["city"]).await?;
        store.append("t", &rows("d2", "rosario", &[3]), &["city"]).await?;

        let stats = store.delete("t", &Predicate::eq("city", "cordoba")).await?;

        assert_eq!(stats.num_deleted_rows, 2);
        assert_eq!(stats.num_removed_files, 1);
        assert_eq!(stats.num_added_files, 0);
        assert_eq!(stats.version, 3);
        assert_eq!(store.read("t").await?.num_rows(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_without_matches_does_not_commit() -> TestResult {
        let tmp = TempDir::new()?;
        let store = TableStore::new(StorageLocation::local(tmp.path()));
        store.append("t", &rows("d1", "cordoba", &[1]), &["city"]).await?;

        let stats = store.delete("t", &Predicate::eq("city", "salta")).await?;

        assert_eq!(stats.version, 1);
        assert_eq!(store.version("t").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_rejects_source_references() -> TestResult {
        let tmp = TempDir::new()?;
        let store = TableStore::new(StorageLocation::local(tmp.path()));
        store.append("t", &rows("d1", "cordoba", &[1]), &["city"]).await?;

        let err = store
            .delete("t", &Predicate::key_eq("city"))
            .await
            .expect_err("source alias");

        assert!(matches!(err, TableError::InvalidPredicate { .. }));
        Ok(())
    }
}
