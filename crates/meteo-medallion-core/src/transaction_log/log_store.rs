//! Async helpers for persisting and reading the metadata log.
//!
//! This module owns all interactions with `_medallion_log/`:
//! - Tracking the `CURRENT` pointer and interpreting the "no file" case as
//!   version `0` (no table yet).
//! - Writing zero-padded commit files with optimistic concurrency control so
//!   each version is created exactly once.
//! - Mapping storage-layer failures into [`CommitError`] variants so callers
//!   can tell conflicts, storage errors and corrupt state apart.
use std::path::Path;

use chrono::Utc;
use log::warn;
use snafu::{Backtrace, prelude::*};

use crate::storage::{self, TableLocation, layout};
use crate::transaction_log::{
    CommitError, ConflictSnafu, CorruptStateSnafu, StorageSnafu,
    actions::{Commit, LogAction, Operation},
};

/// Helper for reading and writing the commit log under a table root.
///
/// Layout:
///   <root>/_medallion_log/0000000001.json
///   <root>/_medallion_log/0000000002.json
///   <root>/_medallion_log/CURRENT
#[derive(Debug, Clone)]
pub struct TransactionLogStore {
    location: TableLocation,
}

impl TransactionLogStore {
    /// Create a new TransactionLogStore rooted at a table directory.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    /// Get the TableLocation of the LogStore.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    async fn write_atomic_rel(&self, rel: &Path, contents: &[u8]) -> Result<(), CommitError> {
        storage::write_atomic(self.location.as_ref(), rel, contents)
            .await
            .context(StorageSnafu)
    }

    /// Resolve a commit file for `version` left behind by a writer that never
    /// advanced CURRENT past `expected`.
    ///
    /// A complete commit prepared against `expected` is promoted and the caller
    /// gets a `Conflict` so it re-plans on top of it. An empty or unparseable
    /// file is removed.
    async fn repair_orphan(&self, expected: u64, version: u64) -> Result<(), CommitError> {
        let rel = layout::commit_rel_path(version);
        let bytes = match storage::read_all_bytes(self.location.as_ref(), &rel).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(source) => return Err(CommitError::Storage { source }),
        };

        match serde_json::from_slice::<Commit>(&bytes) {
            Ok(orphan) if orphan.version == version && orphan.base_version == expected => {
                warn!(
                    "{}: promoting orphaned commit {version} ({})",
                    self.location, orphan.operation
                );
                let current_contents = format!("{version}\n");
                self.write_atomic_rel(&layout::current_rel_path(), current_contents.as_bytes())
                    .await?;
                ConflictSnafu {
                    expected,
                    found: version,
                }
                .fail()
            }
            _ => {
                warn!(
                    "{}: removing incomplete commit file {}",
                    self.location,
                    rel.display()
                );
                storage::delete(self.location.as_ref(), &rel)
                    .await
                    .context(StorageSnafu)
            }
        }
    }

    /// Load a single commit by version.
    ///
    /// - On storage-layer failures, returns `CommitError::Storage`.
    /// - On JSON parse failures, returns `CommitError::CorruptState`.
    pub async fn load_commit(&self, version: u64) -> Result<Commit, CommitError> {
        let rel = layout::commit_rel_path(version);
        let json = storage::read_to_string(self.location.as_ref(), &rel)
            .await
            .context(StorageSnafu)?;

        serde_json::from_str(&json).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to parse commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })
    }

    /// Load the CURRENT version pointer.
    ///
    /// - If CURRENT does not exist, the table does not exist yet: returns 0.
    /// - If CURRENT contains invalid or empty content, returns CorruptState.
    pub async fn load_current_version(&self) -> Result<u64, CommitError> {
        let rel = layout::current_rel_path();

        let contents = match storage::read_to_string(self.location.as_ref(), &rel).await {
            Ok(s) => s,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(source) => return Err(CommitError::Storage { source }),
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return CorruptStateSnafu {
                msg: format!("CURRENT has empty content at {rel:?}"),
            }
            .fail();
        }

        trimmed
            .parse::<u64>()
            .map_err(|e| CommitError::CorruptState {
                msg: format!("CURRENT has invalid content {trimmed:?}: {e}"),
                backtrace: Backtrace::capture(),
            })
    }

    /// Commit a new version with an optimistic concurrency guard.
    ///
    /// ## Concurrency semantics
    ///
    /// The check on CURRENT is advisory. Two writers may both read the same
    /// CURRENT value and race for the same next version; the real guard is the
    /// create-only write of the commit file. The loser gets
    /// `CommitError::Storage` wrapping an "already exists" storage error, which
    /// [`CommitError::is_conflict`] reports as a conflict.
    ///
    /// ## Crash recovery
    ///
    /// If the commit file is created but updating CURRENT fails, the commit
    /// file is an orphan that readers ignore. The next writer repairs it: a
    /// complete orphan built on `expected` is promoted to CURRENT (the writer
    /// sees a `Conflict` and retries on the new version), and an empty or
    /// invalid one is deleted before the writer proceeds.
    ///
    /// ## Steps
    ///
    /// 1. Load CURRENT; if it differs from `expected`, return `Conflict`.
    /// 2. Repair any orphaned commit file for `expected + 1`.
    /// 3. Build and serialize the commit for `expected + 1`.
    /// 4. Create the commit file with create-only semantics.
    /// 5. Atomically replace CURRENT with the new version.
    pub async fn commit_with_expected_version(
        &self,
        expected: u64,
        operation: Operation,
        actions: Vec<LogAction>,
    ) -> Result<u64, CommitError> {
        let current = self.load_current_version().await?;
        if current != expected {
            return ConflictSnafu {
                expected,
                found: current,
            }
            .fail();
        }

        let version = expected.checked_add(1).context(CorruptStateSnafu {
            msg: "version counter overflow".to_string(),
        })?;
        self.repair_orphan(expected, version).await?;

        let commit = Commit {
            version,
            base_version: expected,
            timestamp: Utc::now(),
            operation,
            actions,
        };

        let json = serde_json::to_vec(&commit).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to serialize commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        let commit_rel = layout::commit_rel_path(version);
        storage::write_new(self.location.as_ref(), &commit_rel, &json)
            .await
            .context(StorageSnafu)?;

        let current_contents = format!("{version}\n");
        self.write_atomic_rel(&layout::current_rel_path(), current_contents.as_bytes())
            .await?;

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn create_test_log_store() -> (TempDir, TransactionLogStore) {
        let tmp = TempDir::new().expect("create temp dir");
        let location = TableLocation::local(tmp.path());
        (tmp, TransactionLogStore::new(location))
    }

    async fn write_current(tmp: &TempDir, contents: &str) -> TestResult {
        let log_dir = tmp.path().join(layout::LOG_DIR_NAME);
        tokio::fs::create_dir_all(&log_dir).await?;
        tokio::fs::write(log_dir.join(layout::CURRENT_FILE_NAME), contents).await?;
        Ok(())
    }

    #[tokio::test]
    async fn load_current_version_returns_zero_when_no_current_file() -> TestResult {
        let (_tmp, store) = create_test_log_store();

        assert_eq!(store.load_current_version().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn load_current_version_handles_whitespace() -> TestResult {
        let (tmp, store) = create_test_log_store();
        write_current(&tmp, "  42  \n").await?;

        assert_eq!(store.load_current_version().await?, 42);
        Ok(())
    }

    #[tokio::test]
    async fn load_current_version_rejects_empty_and_garbage() -> TestResult {
        let (tmp, store) = create_test_log_store();

        write_current(&tmp, "").await?;
        let err = store.load_current_version().await.expect_err("empty");
        assert!(matches!(err, CommitError::CorruptState { .. }));

        write_current(&tmp, "not-a-number").await?;
        let err = store.load_current_version().await.expect_err("garbage");
        assert!(matches!(err, CommitError::CorruptState { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn commits_advance_current_one_version_at_a_time() -> TestResult {
        let (tmp, store) = create_test_log_store();

        let v1 = store
            .commit_with_expected_version(0, Operation::Create, vec![])
            .await?;
        let v2 = store
            .commit_with_expected_version(1, Operation::Append, vec![])
            .await?;

        assert_eq!((v1, v2), (1, 2));
        assert_eq!(store.load_current_version().await?, 2);
        let current =
            tokio::fs::read_to_string(tmp.path().join(layout::current_rel_path())).await?;
        assert_eq!(current, "2\n");
        assert!(tmp.path().join(layout::commit_rel_path(1)).exists());
        Ok(())
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        store
            .commit_with_expected_version(0, Operation::Create, vec![])
            .await?;

        let err = store
            .commit_with_expected_version(0, Operation::Append, vec![])
            .await
            .expect_err("expected Conflict");

        match &err {
            CommitError::Conflict {
                expected, found, ..
            } => {
                assert_eq!((*expected, *found), (0, 1));
            }
            other => panic!("expected Conflict error, got {other:?}"),
        }
        assert!(err.is_conflict());
        Ok(())
    }

    #[tokio::test]
    async fn commit_written_json_carries_operation_and_actions() -> TestResult {
        let (_tmp, store) = create_test_log_store();
        let action = LogAction::RemoveFile {
            path: "city=rosario/part-1.parquet".to_string(),
        };
        let operation = Operation::Delete {
            predicate: "tgt.city = 'rosario'".to_string(),
        };

        store
            .commit_with_expected_version(0, operation.clone(), vec![action.clone()])
            .await?;

        let commit = store.load_commit(1).await?;
        assert_eq!(commit.version, 1);
        assert_eq!(commit.base_version, 0);
        assert_eq!(commit.operation, operation);
        assert_eq!(commit.actions, vec![action]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_orphan_commit_file_is_replaced() -> TestResult {
        let (tmp, store) = create_test_log_store();
        store
            .commit_with_expected_version(0, Operation::Create, vec![])
            .await?;
        store
            .commit_with_expected_version(1, Operation::Append, vec![])
            .await?;
        tokio::fs::write(tmp.path().join(layout::commit_rel_path(3)), b"").await?;

        let version = store
            .commit_with_expected_version(2, Operation::Append, vec![])
            .await?;

        assert_eq!(version, 3);
        assert_eq!(store.load_current_version().await?, 3);
        assert_eq!(store.load_commit(3).await?.base_version, 2);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_orphan_commit_file_is_replaced() -> TestResult {
        let (tmp, store) = create_test_log_store();
        let log_dir = tmp.path().join(layout::LOG_DIR_NAME);
        tokio::fs::create_dir_all(&log_dir).await?;
        tokio::fs::write(tmp.path().join(layout::commit_rel_path(1)), b"{\"version\": 1,").await?;

        let version = store
            .commit_with_expected_version(0, Operation::Create, vec![])
            .await?;

        assert_eq!(version, 1);
        assert_eq!(store.load_commit(1).await?.operation, Operation::Create);
        Ok(())
    }

    #[tokio::test]
    async fn complete_orphan_is_promoted_and_reported_as_conflict() -> TestResult {
        let (tmp, store) = create_test_log_store();
        store
            .commit_with_expected_version(0, Operation::Create, vec![])
            .await?;

        let orphan = Commit {
            version: 2,
            base_version: 1,
            timestamp: Utc::now(),
            operation: Operation::Append,
            actions: vec![LogAction::RemoveFile {
                path: "city=cordoba/part-1.parquet".to_string(),
            }],
        };
        tokio::fs::write(
            tmp.path().join(layout::commit_rel_path(2)),
            serde_json::to_vec(&orphan)?,
        )
        .await?;

        let err = store
            .commit_with_expected_version(1, Operation::Append, vec![])
            .await
            .expect_err("expected Conflict");
        assert!(err.is_conflict());
        assert_eq!(store.load_current_version().await?, 2);

        let version = store
            .commit_with_expected_version(2, Operation::Append, vec![])
            .await?;
        assert_eq!(version, 3);
        assert_eq!(store.load_commit(2).await?.actions, orphan.actions);
        Ok(())
    }

    #[tokio::test]
    async fn losing_the_commit_file_race_reports_already_exists() -> TestResult {
        let (tmp, store) = create_test_log_store();
        let location = TableLocation::local(tmp.path());
        let rel = layout::commit_rel_path(1);

        storage::write_new(location.as_ref(), &rel, b"{}").await?;
        let err = storage::write_new(location.as_ref(), &rel, b"{}")
            .await
            .expect_err("expected AlreadyExists");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        let err = CommitError::Storage { source: err };
        assert!(err.is_conflict());
        assert_eq!(store.load_current_version().await?, 0);
        Ok(())
    }
}
