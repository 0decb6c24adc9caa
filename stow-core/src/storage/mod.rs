/*!
Storage backends for serialized objects.

[`StorageBackend`] is the port every medium implements: existence check, read,
write, rename and directory listing over "/"-separated logical paths. The
concrete media differ in what they can guarantee (see
[`BackendCapabilities`]); a backend that cannot honour an operation returns an
error instead of quietly weakening it.
*/

#[cfg(feature = "local")]
pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use crate::Result;

#[cfg(feature = "local")]
pub use local::LocalFileStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "s3")]
pub use s3::S3StorageAdapter;

/// Guarantees a backend gives for its mutating operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// A write either lands completely or leaves the old content in place
    pub atomic_write: bool,
    /// A rename is a single atomic move rather than copy + delete
    pub atomic_rename: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            atomic_write: true,
            atomic_rename: true,
        }
    }
}

/// Storage abstraction over a concrete medium
///
/// Implementations are shared between stores and threads, so every method
/// takes `&self`. None of them retries a mutating operation on its own.
pub trait StorageBackend: Send + Sync {
    /// Check whether an object is stored at `path`
    ///
    /// Returns `Err` only when the medium itself cannot answer.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Read the bytes stored at `path`
    ///
    /// # Errors
    /// * `StowError::NotFound` - nothing is stored at `path`
    /// * `StowError::Storage` - the medium failed
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Store `data` at `path`, replacing any previous content
    ///
    /// Must not partially apply: on failure the previous content (if any)
    /// stays as it was.
    ///
    /// # Errors
    /// * `StowError::WriteFailed` - the medium rejected the write
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Move the object at `from` to `to`
    ///
    /// # Errors
    /// * `StowError::RenameFailed` - `from` is missing, `to` already exists,
    ///   or the medium rejected the move
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Objects stored directly inside `directory`, as full logical paths
    ///
    /// A directory with nothing in it (or that does not exist) lists empty.
    fn list(&self, directory: &str) -> Result<Vec<String>>;

    /// Remove the object at `path`; removing a missing object is not an error
    fn delete(&self, path: &str) -> Result<()>;

    /// Guarantees this backend provides
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}

/// Directory part of a logical path
///
/// ```rust
/// use stow_core::storage::parent_of;
///
/// assert_eq!(parent_of("/path/to/test.model"), "/path/to");
/// assert_eq!(parent_of("/test.model"), "/");
/// assert_eq!(parent_of("test.model"), "");
/// ```
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => "",
    }
}

/// Join a directory and a file name into a logical path
pub fn join_path(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else if directory.ends_with('/') {
        format!("{directory}{name}")
    } else {
        format!("{directory}/{name}")
    }
}

/// Strip trailing separators so "a/b/" and "a/b" list the same directory
pub(crate) fn normalize_dir(directory: &str) -> &str {
    let trimmed = directory.trim_end_matches('/');
    if trimmed.is_empty() && directory.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}
