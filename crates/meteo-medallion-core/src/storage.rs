//! Storage backends and byte-level I/O helpers.
//!
//! This module centralizes every interaction with the bytes behind a table:
//! commit files, the `CURRENT` pointer and Parquet data files. Two backends
//! are supported:
//!
//! - the local filesystem, driven through `tokio::fs` with write-then-rename
//!   for replacements and write-then-hard-link for create-only writes;
//! - an S3-compatible object store, driven through `object_store`, where
//!   create-only writes use a conditional `PutMode::Create` when the bucket
//!   supports it, or a head-then-put probe when the operator explicitly
//!   allowed unsafe renames.
//!
//! Higher-level modules (`transaction_log`, `table`) only see a
//! [`StorageLocation`] plus relative paths, never raw backend handles.

mod error;
pub mod layout;
mod table_location;

pub use error::{BackendError, StorageError};
pub(crate) use error::{AlreadyExistsNoSourceSnafu, OtherIoSnafu};
pub use table_location::TableLocation;

use std::{
    fmt, io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path as ObjectPath};
use snafu::{Backtrace, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// How create-only writes are enforced on an object store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    /// The store honours `If-None-Match` style conditional puts.
    Conditional,
    /// The store has no conditional put; probe with `HEAD` then `PUT`.
    ///
    /// Two writers racing on the same key can both succeed, so this mode is
    /// only selected when the operator opted into unsafe renames.
    ProbeThenPut,
}

/// A prefix inside an object store bucket.
#[derive(Clone)]
pub struct ObjectLocation {
    store: Arc<dyn ObjectStore>,
    uri: String,
    prefix: ObjectPath,
    create_mode: CreateMode,
}

impl ObjectLocation {
    /// Wrap an object store handle rooted at `prefix`.
    ///
    /// `uri` is only used for display (for example `s3://bucket`).
    pub fn new(
        store: Arc<dyn ObjectStore>,
        uri: impl Into<String>,
        prefix: ObjectPath,
        create_mode: CreateMode,
    ) -> Self {
        Self {
            store,
            uri: uri.into(),
            prefix,
            create_mode,
        }
    }

    fn resolve(&self, rel: &Path) -> ObjectPath {
        let mut out = self.prefix.clone();
        for component in rel.components() {
            if let Component::Normal(part) = component {
                out = out.child(part.to_string_lossy().as_ref());
            }
        }
        out
    }

    fn display(&self, rel: &Path) -> String {
        format!("{}/{}", self.uri.trim_end_matches('/'), self.resolve(rel))
    }
}

impl fmt::Debug for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLocation")
            .field("uri", &self.uri)
            .field("prefix", &self.prefix.as_ref())
            .field("create_mode", &self.create_mode)
            .finish()
    }
}

/// Root of a storage namespace: a local directory or an object store prefix.
#[derive(Clone, Debug)]
pub enum StorageLocation {
    /// Files live under the given local directory.
    Local(PathBuf),
    /// Objects live under a bucket prefix.
    Object(ObjectLocation),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Return a location rooted at `rel` below this one.
    pub fn join(&self, rel: impl AsRef<Path>) -> Self {
        let rel = rel.as_ref();
        match self {
            StorageLocation::Local(root) => StorageLocation::Local(root.join(rel)),
            StorageLocation::Object(obj) => {
                let mut child = obj.clone();
                child.prefix = obj.resolve(rel);
                StorageLocation::Object(child)
            }
        }
    }

    /// Human-readable form of `rel` resolved against this location.
    pub fn display_path(&self, rel: &Path) -> String {
        match self {
            StorageLocation::Local(root) => root.join(rel).display().to_string(),
            StorageLocation::Object(obj) => obj.display(rel),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(root) => write!(f, "{}", root.display()),
            StorageLocation::Object(obj) => write!(f, "{}", obj.display(Path::new(""))),
        }
    }
}

fn classify_object_error(path: String, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound {
            path,
            source: BackendError::Object(e),
            backtrace: Backtrace::capture(),
        },
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            StorageError::AlreadyExists {
                path,
                source: BackendError::Object(e),
                backtrace: Backtrace::capture(),
            }
        }
        other => StorageError::OtherIo {
            path,
            source: BackendError::Object(other),
            backtrace: Backtrace::capture(),
        },
    }
}

fn classify_local_error(path: String, e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
        io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
        _ => StorageError::OtherIo {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location`, replacing any previous
/// object atomically.
///
/// Locally this writes a uniquely named temporary file next to the target,
/// syncs it and renames it into place. Object stores replace whole objects
/// atomically on `PUT`.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            create_parent_dir(&abs).await?;

            let tmp_path = abs.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
            let mut guard = TempFileGuard::new(tmp_path.clone());
            let tmp_str = tmp_path.display().to_string();

            {
                let mut file = fs::File::create(&tmp_path)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_str.clone(),
                    })?;
                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_str.clone(),
                    })?;
                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu { path: tmp_str })?;
            }

            fs::rename(&tmp_path, &abs)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: abs.display().to_string(),
                })?;

            guard.disarm();
            Ok(())
        }
        StorageLocation::Object(obj) => {
            let key = obj.resolve(rel_path);
            obj.store
                .put(&key, PutPayload::from(contents.to_vec()))
                .await
                .map_err(|e| classify_object_error(obj.display(rel_path), e))?;
            Ok(())
        }
    }
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if it already exists.
///
/// This is the guard behind per-version commit files and data files.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            create_parent_dir(&abs).await?;

            // The target only ever appears with its full contents.
            let tmp_path = abs.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
            let _guard = TempFileGuard::new(tmp_path.clone());
            let tmp_str = tmp_path.display().to_string();

            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)
                .await
                .map_err(|e| classify_local_error(tmp_str.clone(), e))?;
            file.write_all(contents)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: tmp_str.clone(),
                })?;
            file.sync_all()
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu { path: tmp_str })?;

            fs::hard_link(&tmp_path, &abs)
                .await
                .map_err(|e| classify_local_error(abs.display().to_string(), e))?;
            Ok(())
        }
        StorageLocation::Object(obj) => {
            let key = obj.resolve(rel_path);
            let display = obj.display(rel_path);
            let payload = PutPayload::from(contents.to_vec());

            match obj.create_mode {
                CreateMode::Conditional => {
                    obj.store
                        .put_opts(&key, payload, PutOptions::from(PutMode::Create))
                        .await
                        .map_err(|e| classify_object_error(display, e))?;
                }
                CreateMode::ProbeThenPut => {
                    match obj.store.head(&key).await {
                        Ok(_) => return AlreadyExistsNoSourceSnafu { path: display }.fail(),
                        Err(object_store::Error::NotFound { .. }) => {}
                        Err(e) => return Err(classify_object_error(display, e)),
                    }
                    obj.store
                        .put(&key, payload)
                        .await
                        .map_err(|e| classify_object_error(display, e))?;
                }
            }
            Ok(())
        }
    }
}

/// Remove `rel_path` within `location`; a missing file is not an error.
pub async fn delete(location: &StorageLocation, rel_path: &Path) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            match fs::remove_file(&abs).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(classify_local_error(abs.display().to_string(), e)),
            }
        }
        StorageLocation::Object(obj) => match obj.store.delete(&obj.resolve(rel_path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(classify_object_error(obj.display(rel_path), e)),
        },
    }
}

/// Read the full contents of `rel_path` within `location`.
///
/// A missing file yields [`StorageError::NotFound`].
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Bytes> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            fs::read(&abs)
                .await
                .map(Bytes::from)
                .map_err(|e| classify_local_error(abs.display().to_string(), e))
        }
        StorageLocation::Object(obj) => {
            let key = obj.resolve(rel_path);
            let result = obj
                .store
                .get(&key)
                .await
                .map_err(|e| classify_object_error(obj.display(rel_path), e))?;
            result
                .bytes()
                .await
                .map_err(|e| classify_object_error(obj.display(rel_path), e))
        }
    }
}

/// Read `rel_path` within `location` as UTF-8 text.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    let bytes = read_all_bytes(location, rel_path).await?;
    String::from_utf8(bytes.to_vec()).map_err(|e| StorageError::OtherIo {
        path: location.display_path(rel_path),
        source: BackendError::Local(io::Error::new(io::ErrorKind::InvalidData, e)),
        backtrace: Backtrace::capture(),
    })
}

/// Whether `rel_path` exists within `location`.
pub async fn exists(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            match fs::metadata(&abs).await {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(classify_local_error(abs.display().to_string(), e)),
            }
        }
        StorageLocation::Object(obj) => match obj.store.head(&obj.resolve(rel_path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(classify_object_error(obj.display(rel_path), e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn memory_location(mode: CreateMode) -> StorageLocation {
        StorageLocation::Object(ObjectLocation::new(
            Arc::new(InMemory::new()),
            "memory://bucket",
            ObjectPath::from("lake"),
            mode,
        ))
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let rel_path = Path::new("nested/deep/file.txt");

        write_atomic(&location, rel_path, b"nested content").await?;

        let read_back = tokio::fs::read_to_string(tmp.path().join(rel_path)).await?;
        assert_eq!(read_back, "nested content");
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_overwrites_and_leaves_no_tmp_files() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let rel_path = Path::new("CURRENT");

        write_atomic(&location, rel_path, b"1\n").await?;
        write_atomic(&location, rel_path, b"2\n").await?;

        assert_eq!(read_to_string(&location, rel_path).await?, "2\n");
        let mut entries = tokio::fs::read_dir(tmp.path()).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["CURRENT".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());

        let err = read_to_string(&location, Path::new("missing.txt"))
            .await
            .expect_err("expected NotFound");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn write_new_refuses_to_clobber_local_files() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let rel_path = Path::new("log/0000000001.json");

        write_new(&location, rel_path, b"first").await?;
        let err = write_new(&location, rel_path, b"second")
            .await
            .expect_err("expected AlreadyExists");

        assert!(err.is_already_exists());
        assert_eq!(read_to_string(&location, rel_path).await?, "first");

        let mut entries = tokio::fs::read_dir(tmp.path().join("log")).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["0000000001.json".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_files_and_ignores_missing_ones() -> TestResult {
        let tmp = TempDir::new()?;
        let local = StorageLocation::local(tmp.path());
        let memory = memory_location(CreateMode::Conditional);
        let rel_path = Path::new("log/0000000002.json");

        for location in [&local, &memory] {
            write_new(location, rel_path, b"{}").await?;
            delete(location, rel_path).await?;
            assert!(!exists(location, rel_path).await?);
            delete(location, rel_path).await?;
            write_new(location, rel_path, b"{}").await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn object_store_conditional_create_detects_existing_key() -> TestResult {
        let location = memory_location(CreateMode::Conditional);
        let rel_path = Path::new("t/_medallion_log/0000000001.json");

        write_new(&location, rel_path, b"{}").await?;
        let err = write_new(&location, rel_path, b"{}")
            .await
            .expect_err("expected AlreadyExists");
        assert!(err.is_already_exists());
        Ok(())
    }

    #[tokio::test]
    async fn object_store_probe_mode_detects_existing_key() -> TestResult {
        let location = memory_location(CreateMode::ProbeThenPut);
        let rel_path = Path::new("a/b.parquet");

        write_new(&location, rel_path, b"abc").await?;
        let err = write_new(&location, rel_path, b"abc")
            .await
            .expect_err("expected AlreadyExists");
        assert!(err.is_already_exists());
        assert!(exists(&location, rel_path).await?);
        Ok(())
    }

    #[tokio::test]
    async fn joined_object_locations_resolve_below_prefix() -> TestResult {
        let root = memory_location(CreateMode::Conditional);
        let table = root.join("bronze/forecast");

        write_atomic(&table, Path::new("CURRENT"), b"3\n").await?;

        let via_root = read_to_string(&root, Path::new("bronze/forecast/CURRENT")).await?;
        assert_eq!(via_root, "3\n");
        assert_eq!(
            table.display_path(Path::new("CURRENT")),
            "memory://bucket/lake/bronze/forecast/CURRENT"
        );
        Ok(())
    }
}
