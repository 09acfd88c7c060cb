//! On-disk layout helpers for a table root.
//!
//! This module centralizes all *relative* path conventions under a table root:
//! - transaction log directory / commit file naming (`_medallion_log/`)
//! - Hive-style partition directories (`city=cordoba/`)
//! - data file naming (`part-<uuid>.parquet`)
//!
//! The functions here return relative [`std::path::PathBuf`] values. Callers
//! join them with a [`crate::storage::TableLocation`] before doing IO.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use uuid::Uuid;

// ====================
// Transaction log layout
// ====================

/// Name of the subdirectory containing the commit log.
pub const LOG_DIR_NAME: &str = "_medallion_log";

/// Name of the file that stores the current version pointer.
pub const CURRENT_FILE_NAME: &str = "CURRENT";

/// Number of digits used in zero-padded commit file names.
pub const COMMIT_FILENAME_DIGITS: usize = 10;

/// Relative path: `_medallion_log/`
pub fn log_rel_dir() -> PathBuf {
    PathBuf::from(LOG_DIR_NAME)
}

/// Relative path: `_medallion_log/CURRENT`
pub fn current_rel_path() -> PathBuf {
    log_rel_dir().join(CURRENT_FILE_NAME)
}

/// Relative path: `_medallion_log/<zero-padded>.json`
pub fn commit_rel_path(version: u64) -> PathBuf {
    let file_name = format!("{:0width$}.json", version, width = COMMIT_FILENAME_DIGITS);
    log_rel_dir().join(file_name)
}

// ====================
// Data layout
// ====================

/// Partition value recorded for nulls, following the Hive convention.
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

/// Percent-encode everything outside `[A-Za-z0-9_.-]` so a partition value
/// is always a single path segment.
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Relative directory for one partition, columns in `partition_columns`
/// order: `date_retrieved=2024-01-01/city=cordoba`.
pub fn partition_rel_dir(
    partition_columns: &[String],
    values: &BTreeMap<String, String>,
) -> PathBuf {
    let mut dir = PathBuf::new();
    for column in partition_columns {
        let value = values
            .get(column)
            .map(String::as_str)
            .unwrap_or(NULL_PARTITION_VALUE);
        dir.push(format!("{column}={}", escape_partition_value(value)));
    }
    dir
}

/// Fresh data file path inside a partition directory.
pub fn data_file_rel_path(
    partition_columns: &[String],
    values: &BTreeMap<String, String>,
) -> PathBuf {
    partition_rel_dir(partition_columns, values)
        .join(format!("part-{}.parquet", Uuid::new_v4().simple()))
}

/// Render a relative path with `/` separators, as recorded in the log.
pub fn rel_path_string(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_paths_are_zero_padded() {
        assert_eq!(
            commit_rel_path(7),
            PathBuf::from("_medallion_log/0000000007.json")
        );
        assert_eq!(current_rel_path(), PathBuf::from("_medallion_log/CURRENT"));
    }

    #[test]
    fn partition_dirs_follow_column_order_and_escape_values() {
        let columns = vec!["date_retrieved".to_string(), "city".to_string()];
        let values = BTreeMap::from([
            ("city".to_string(), "san juan/norte".to_string()),
            ("date_retrieved".to_string(), "2024-01-01".to_string()),
        ]);

        let dir = partition_rel_dir(&columns, &values);

        assert_eq!(
            dir,
            PathBuf::from("date_retrieved=2024-01-01/city=san%20juan%2Fnorte")
        );
    }

    #[test]
    fn data_files_land_inside_their_partition() {
        let columns = vec!["city".to_string()];
        let values = BTreeMap::from([("city".to_string(), "rosario".to_string())]);

        let path = data_file_rel_path(&columns, &values);

        assert!(path.starts_with("city=rosario"));
        assert!(rel_path_string(&path).starts_with("city=rosario/part-"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("parquet"));
    }
}
