use std::path::Path;

use bytes::Bytes;

use crate::storage::{self, StorageLocation, StorageResult};

/// Table root location with table-scoped semantics.
///
/// This wraps [`StorageLocation`] and is used when callers need to treat the
/// location as a single table root (log layout, partition directories, data
/// files).
#[derive(Debug, Clone)]
pub struct TableLocation(StorageLocation);

impl From<TableLocation> for StorageLocation {
    fn from(t: TableLocation) -> Self {
        t.0
    }
}

impl AsRef<StorageLocation> for TableLocation {
    fn as_ref(&self) -> &StorageLocation {
        &self.0
    }
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<std::path::PathBuf>) -> Self {
        TableLocation(StorageLocation::local(root))
    }

    /// Table rooted at `table_path` under a storage root
    /// (for example `bronze/forecast` under `./out`).
    pub fn under(root: &StorageLocation, table_path: &str) -> Self {
        TableLocation(root.join(table_path))
    }

    /// Return the underlying StorageLocation.
    pub fn storage(&self) -> &StorageLocation {
        &self.0
    }

    /// Human-readable path for logs and error messages.
    pub fn display_path(&self, rel: &Path) -> String {
        self.0.display_path(rel)
    }

    /// Read a table-relative file.
    pub async fn read_bytes(&self, rel: &Path) -> StorageResult<Bytes> {
        storage::read_all_bytes(&self.0, rel).await
    }

    /// Create a table-relative file that must not exist yet.
    pub async fn write_new(&self, rel: &Path, contents: &[u8]) -> StorageResult<()> {
        storage::write_new(&self.0, rel, contents).await
    }
}

impl std::fmt::Display for TableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
