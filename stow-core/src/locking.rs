//! Per-path serialization of store operations.
//!
//! A [`VersionedStore`] save is check, rename, then write. Two writers of the
//! same path can interleave those steps and overwrite each other's history
//! rotation. [`LockedStore`] takes a process-wide lock per logical path for the
//! whole of every operation; stores sharing one [`PathLocks`] never interleave.

use crate::serializer::{Persistable, Serializer};
use crate::store::VersionedStore;
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Registry of one mutex per logical path
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `path`, created on first use
    pub fn lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        // A panic while holding the registry leaves the map intact
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of paths that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`VersionedStore`] whose operations hold the path's lock
pub struct LockedStore<S: Serializer> {
    inner: VersionedStore<S>,
    locks: Arc<PathLocks>,
}

impl<S: Serializer> LockedStore<S> {
    /// Wrap `store`, serializing through `locks`
    ///
    /// Every store that writes the same path must share the same `locks`.
    pub fn new(store: VersionedStore<S>, locks: Arc<PathLocks>) -> Self {
        Self {
            inner: store,
            locks,
        }
    }

    pub fn inner(&self) -> &VersionedStore<S> {
        &self.inner
    }

    pub fn into_inner(self) -> VersionedStore<S> {
        self.inner
    }

    pub fn save<T: Persistable>(&self, object: &T) -> Result<()> {
        self.with_lock(|store| store.save(object))
    }

    pub fn load<T: Persistable>(&self) -> Result<T> {
        self.with_lock(|store| store.load())
    }

    pub fn load_from<T: Persistable>(&self, location: &str) -> Result<T> {
        self.with_lock(|store| store.load_from(location))
    }

    pub fn exists(&self) -> Result<bool> {
        self.with_lock(|store| store.exists())
    }

    pub fn history(&self) -> Result<Vec<String>> {
        self.with_lock(|store| store.history())
    }

    pub fn restore(&self, entry: &str) -> Result<()> {
        self.with_lock(|store| store.restore(entry))
    }

    pub fn prune_history(&self, keep: usize) -> Result<usize> {
        self.with_lock(|store| store.prune_history(keep))
    }

    fn with_lock<R>(&self, op: impl FnOnce(&VersionedStore<S>) -> Result<R>) -> Result<R> {
        let lock = self.locks.lock_for(self.inner.path());
        let _guard: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(PoisonError::into_inner);
        trace!(path = %self.inner.path(), "Acquired path lock");
        op(&self.inner)
    }
}

impl<S: Serializer> std::fmt::Debug for LockedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedStore")
            .field("inner", &self.inner)
            .finish()
    }
}
