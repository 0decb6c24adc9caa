/*!
In-memory storage backend.
*/

use super::{normalize_dir, parent_of, StorageBackend};
use crate::{Result, StowError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// `HashMap`-backed storage
///
/// Clones share the same map, so a handle can be given to several stores
/// and still be inspected by the caller. Every operation, including rename,
/// is atomic under the map's lock.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    ///
    /// Map updates are single inserts or removes, so a map left behind by a
    /// panicking thread is still consistent and is read as-is.
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of every stored path
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    fn objects(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .read()
            .map_err(|_| StowError::storage("memory storage lock poisoned"))
    }

    fn objects_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .write()
            .map_err(|_| StowError::storage("memory storage lock poisoned"))
    }
}

impl StorageBackend for MemoryStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects()?.contains_key(path))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.objects()?
            .get(path)
            .cloned()
            .ok_or_else(|| StowError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut objects = self
            .objects_mut()
            .map_err(|e| StowError::write_failed(path, e))?;
        objects.insert(path.to_string(), data.to_vec());
        debug!(path = %path, size = data.len(), "Stored object in memory");
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self
            .objects_mut()
            .map_err(|e| StowError::rename_failed(from, to, e))?;
        if objects.contains_key(to) {
            return Err(StowError::rename_failed(from, to, "destination already exists"));
        }
        let data = objects
            .remove(from)
            .ok_or_else(|| StowError::rename_failed(from, to, "source does not exist"))?;
        objects.insert(to.to_string(), data);
        debug!(from = %from, to = %to, "Renamed object in memory");
        Ok(())
    }

    fn list(&self, directory: &str) -> Result<Vec<String>> {
        let directory = normalize_dir(directory);
        let mut entries: Vec<String> = self
            .objects()?
            .keys()
            .filter(|path| parent_of(path) == directory)
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.objects_mut()?.remove(path);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        let path = "/path/to/test.model";

        assert!(!storage.exists(path).unwrap());
        storage.write(path, b"b1").unwrap();
        assert!(storage.exists(path).unwrap());
        assert_eq!(storage.read(path).unwrap(), b"b1");

        storage.write(path, b"b2").unwrap();
        assert_eq!(storage.read(path).unwrap(), b"b2");
        assert_eq!(storage.len(), 1);

        storage.delete(path).unwrap();
        assert!(!storage.exists(path).unwrap());
        assert!(storage.delete(path).is_ok());
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.read("missing.model"),
            Err(StowError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_moves_object() {
        let storage = MemoryStorage::new();
        storage.write("a/x", b"data").unwrap();

        storage.rename("a/x", "a/y").unwrap();
        assert!(!storage.exists("a/x").unwrap());
        assert_eq!(storage.read("a/y").unwrap(), b"data");
    }

    #[test]
    fn test_rename_refuses_missing_source_and_existing_destination() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.rename("a/x", "a/y"),
            Err(StowError::RenameFailed { .. })
        ));

        storage.write("a/x", b"one").unwrap();
        storage.write("a/y", b"two").unwrap();
        assert!(matches!(
            storage.rename("a/x", "a/y"),
            Err(StowError::RenameFailed { .. })
        ));
        assert_eq!(storage.read("a/x").unwrap(), b"one");
        assert_eq!(storage.read("a/y").unwrap(), b"two");
    }

    #[test]
    fn test_list_only_direct_children() {
        let storage = MemoryStorage::new();
        storage.write("/path/to/a.model", b"1").unwrap();
        storage.write("/path/to/b.model", b"2").unwrap();
        storage.write("/path/to/nested/c.model", b"3").unwrap();
        storage.write("/path/other.model", b"4").unwrap();

        assert_eq!(
            storage.list("/path/to").unwrap(),
            vec!["/path/to/a.model", "/path/to/b.model"]
        );
        assert_eq!(storage.list("/path/to/").unwrap().len(), 2);
        assert!(storage.list("/nowhere").unwrap().is_empty());
    }

    #[test]
    fn test_inspection_survives_poisoned_lock() {
        let storage = MemoryStorage::new();
        storage.write("models/a.model", b"1").unwrap();
        storage.write("models/b.model", b"2").unwrap();

        let poisoner = storage.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.objects.write().unwrap();
            panic!("poison the object map");
        })
        .join();

        assert!(storage.objects.is_poisoned());
        assert_eq!(storage.len(), 2);
        assert!(!storage.is_empty());
        assert_eq!(storage.paths(), vec!["models/a.model", "models/b.model"]);
        assert!(matches!(
            storage.read("models/a.model"),
            Err(StowError::Storage(_))
        ));
    }

    #[test]
    fn test_clones_share_objects() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();
        storage.write("k", b"v").unwrap();
        assert_eq!(handle.read("k").unwrap(), b"v");
    }
}
