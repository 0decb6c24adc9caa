/*!
Local filesystem storage backend.
*/

use super::{join_path, normalize_dir, StorageBackend};
use crate::{Result, StowError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name prefix of staging files for in-flight writes
const STAGING_PREFIX: &str = ".stow-staged-";

/// Local filesystem storage backend
///
/// Objects are plain files. Writes go to a temporary file in the target
/// directory which is then renamed over the destination, so a failed write
/// never leaves a truncated object behind. Missing parent directories are
/// created on demand. Renames hard-link the destination before unlinking the
/// source, so the filesystem itself refuses to replace an existing file.
///
/// # Example
/// ```rust
/// use stow_core::storage::{LocalFileStorage, StorageBackend};
///
/// let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::with_base_dir(dir.path());
/// storage.write("models/classifier.model", b"serialized model")?;
/// assert!(storage.exists("models/classifier.model")?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalFileStorage {
    /// Optional base directory all logical paths resolve under
    base_dir: Option<PathBuf>,
}

impl LocalFileStorage {
    /// Create a backend that uses logical paths as-is
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Create a backend resolving logical paths relative to `base_dir`
    ///
    /// Leading separators are ignored so "/models/a.model" stays inside it.
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    /// Base directory, if any
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path.trim_start_matches('/')),
            None if path.is_empty() => PathBuf::from("."),
            None => PathBuf::from(path),
        }
    }

    fn ensure_parent_dir(path: &Path) -> io::Result<&Path> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
        Ok(parent)
    }

    fn is_file(path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Link then unlink: creating the link fails if `destination` exists,
    /// so no concurrent writer's file is ever replaced
    fn move_without_replacing(source: &Path, destination: &Path) -> io::Result<()> {
        fs::hard_link(source, destination)?;
        if let Err(e) = fs::remove_file(source) {
            let _ = fs::remove_file(destination);
            return Err(e);
        }
        Ok(())
    }

    fn write_atomically(full_path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = Self::ensure_parent_dir(full_path)?;
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(parent)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;
        staged.persist(full_path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl StorageBackend for LocalFileStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.resolve_path(path);
        Self::is_file(&full_path).map_err(|e| {
            StowError::storage(format!(
                "Failed to check {}: {}",
                full_path.display(),
                e
            ))
        })
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path);

        match fs::read(&full_path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StowError::NotFound(path.to_string()))
            }
            Err(e) => Err(StowError::storage(format!(
                "Failed to read {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve_path(path);

        Self::write_atomically(&full_path, data)
            .map_err(|e| StowError::write_failed(path, format!("{}: {e}", full_path.display())))?;

        debug!(path = %full_path.display(), size = data.len(), "Wrote object to disk");
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve_path(from);
        let destination = self.resolve_path(to);

        match Self::is_file(&source) {
            Ok(true) => {}
            Ok(false) => return Err(StowError::rename_failed(from, to, "source does not exist")),
            Err(e) => return Err(StowError::rename_failed(from, to, e)),
        }

        Self::ensure_parent_dir(&destination)
            .and_then(|_| Self::move_without_replacing(&source, &destination))
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    StowError::rename_failed(from, to, "destination already exists")
                }
                _ => StowError::rename_failed(from, to, e),
            })?;

        debug!(
            from = %source.display(),
            to = %destination.display(),
            "Renamed object on disk"
        );
        Ok(())
    }

    fn list(&self, directory: &str) -> Result<Vec<String>> {
        let directory = normalize_dir(directory);
        let full_dir = self.resolve_path(directory);

        let entries = match fs::read_dir(&full_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StowError::storage(format!(
                    "Failed to list {}: {}",
                    full_dir.display(),
                    e
                )))
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Staged writes in flight are not objects yet
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            paths.push(join_path(directory, &name));
        }
        paths.sort();
        Ok(paths)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StowError::storage(format!(
                "Failed to delete {}: {}",
                full_path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let path = "test.model";

        storage.write(path, b"b1").unwrap();
        assert!(storage.exists(path).unwrap());
        assert_eq!(storage.read(path).unwrap(), b"b1");

        storage.write(path, b"b2").unwrap();
        assert_eq!(storage.read(path).unwrap(), b"b2");

        storage.delete(path).unwrap();
        assert!(!storage.exists(path).unwrap());
    }

    #[test]
    fn test_local_file_storage_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let path = "/path/to/models/test.model";

        storage.write(path, b"model").unwrap();
        assert!(storage.exists(path).unwrap());
        assert!(temp_dir.path().join("path/to/models/test.model").is_file());
        assert_eq!(storage.read(path).unwrap(), b"model");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        assert!(matches!(
            storage.read("nonexistent.model"),
            Err(StowError::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_is_not_an_object() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        storage.write("dir/a.model", b"x").unwrap();

        assert!(!storage.exists("dir").unwrap());
    }

    #[test]
    fn test_rename_semantics() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        assert!(matches!(
            storage.rename("a.model", "b.model"),
            Err(StowError::RenameFailed { .. })
        ));

        storage.write("a.model", b"one").unwrap();
        storage.write("b.model", b"two").unwrap();
        assert!(matches!(
            storage.rename("a.model", "b.model"),
            Err(StowError::RenameFailed { .. })
        ));
        assert_eq!(storage.read("b.model").unwrap(), b"two");

        storage.rename("a.model", "old/a.model").unwrap();
        assert!(!storage.exists("a.model").unwrap());
        assert_eq!(storage.read("old/a.model").unwrap(), b"one");
    }

    #[test]
    fn test_rename_never_replaces_existing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        storage.write("models/a.model", b"incoming").unwrap();
        // Written behind the backend's back, as another process would
        std::fs::write(temp_dir.path().join("models/a.model.old"), b"theirs").unwrap();

        let err = storage
            .rename("models/a.model", "models/a.model.old")
            .unwrap_err();
        assert!(err.to_string().contains("destination already exists"));
        assert_eq!(storage.read("models/a.model").unwrap(), b"incoming");
        assert_eq!(storage.read("models/a.model.old").unwrap(), b"theirs");
    }

    #[test]
    fn test_dot_tmp_names_are_listed() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        storage.write("models/.tmp_classifier.model", b"1").unwrap();
        storage.write("models/.tmpfile", b"2").unwrap();
        std::fs::write(
            temp_dir.path().join(format!("models/{STAGING_PREFIX}abc123")),
            b"partial",
        )
        .unwrap();

        assert_eq!(
            storage.list("models").unwrap(),
            vec!["models/.tmp_classifier.model", "models/.tmpfile"]
        );
        assert_eq!(storage.base_dir(), Some(temp_dir.path()));
    }

    #[test]
    fn test_list_files_in_directory() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        storage.write("/path/to/a.model", b"1").unwrap();
        storage.write("/path/to/b.model", b"2").unwrap();
        storage.write("/path/to/nested/c.model", b"3").unwrap();

        assert_eq!(
            storage.list("/path/to").unwrap(),
            vec!["/path/to/a.model", "/path/to/b.model"]
        );
        assert!(storage.list("/missing").unwrap().is_empty());
    }

    #[test]
    fn test_write_into_read_only_directory_fails_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        std::fs::write(temp_dir.path().join("blocker"), b"").unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        let result = storage.write("blocker/a.model", b"x");
        assert!(matches!(result, Err(StowError::WriteFailed { .. })));
    }
}
