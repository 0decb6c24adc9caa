/*!
Versioned store: save and load one object at a logical path, optionally
rotating the previous version into a history entry before each overwrite.

A single `save` is a sequence of backend calls (existence check, rename,
write). The sequence is not atomic with respect to other writers of the same
path; wrap the store in a [`crate::locking::LockedStore`] when several
threads write one path.
*/

use crate::observability::{record_history_rotation, OperationTimer};
use crate::serializer::{NativeSerializer, Persistable, Serializer};
use crate::storage::{parent_of, StorageBackend};
use crate::{Result, StowError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extension marking history entries
pub const HISTORY_EXTENSION: &str = "old";

/// How many sequence numbers are probed for a free history slot
const MAX_HISTORY_PROBES: u32 = 10_000;

/// Width of the timestamp discriminator (`yyyymmddHHMMSSffffff`)
const STAMP_LEN: usize = 20;

/// Width of the collision sequence number
const SEQ_LEN: usize = 4;

/// Versioned persistence of one object at one logical path
///
/// The store owns its serializer and path binding and shares the backend
/// with whoever constructed it; it never opens or closes backend sessions.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use stow_core::{MemoryStorage, StorageBackend, VersionedStore};
///
/// let backend = Arc::new(MemoryStorage::new());
/// let store = VersionedStore::new("/models/spam.model", backend.clone()).with_history(true);
///
/// store.save(&vec![0.1_f32, 0.9])?;
/// store.save(&vec![0.2_f32, 0.8])?;
///
/// let latest: Vec<f32> = store.load()?;
/// assert_eq!(latest, vec![0.2, 0.8]);
/// assert_eq!(store.history()?.len(), 1);
/// # Ok::<(), stow_core::StowError>(())
/// ```
pub struct VersionedStore<S: Serializer = NativeSerializer> {
    path: String,
    serializer: S,
    backend: Arc<dyn StorageBackend>,
    history: bool,
}

impl VersionedStore<NativeSerializer> {
    /// Create a store for `path` using the native serializer, history off
    pub fn new<P: Into<String>>(path: P, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            path: path.into(),
            serializer: NativeSerializer::new(),
            backend,
            history: false,
        }
    }
}

impl<S: Serializer> VersionedStore<S> {
    /// Keep the previous object as a history entry on every overwrite
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history = enabled;
        self
    }

    /// Replace the serializer
    pub fn with_serializer<S2: Serializer>(self, serializer: S2) -> VersionedStore<S2> {
        VersionedStore {
            path: self.path,
            serializer,
            backend: self.backend,
            history: self.history,
        }
    }

    /// Logical path the store writes to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether history rotation is enabled
    pub fn history_enabled(&self) -> bool {
        self.history
    }

    /// The shared backend handle
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Whether an object is currently stored at the store's path
    pub fn exists(&self) -> Result<bool> {
        self.backend
            .exists(&self.path)
            .map_err(|e| StowError::read(&self.path, e))
    }

    /// Serialize `object` and store it at the store's path
    ///
    /// With history enabled and an object already present, the present
    /// object is first renamed to a fresh history entry. If that rename
    /// fails nothing is overwritten. If the rename succeeds but the write
    /// then fails, the previous object stays readable from its history entry.
    ///
    /// # Errors
    /// * `StowError::Json` / `StowError::CorruptData` - serialization failed
    /// * `StowError::HistoryCreation` - the previous version could not be preserved
    /// * `StowError::PersistWrite` - the backend rejected the write
    pub fn save<T: Persistable>(&self, object: &T) -> Result<()> {
        let timer = OperationTimer::start("save");

        let result = self
            .serializer
            .serialize(object)
            .and_then(|bytes| self.write_versioned(&bytes, self.history).map(|_| bytes.len()));

        match result {
            Ok(size) => {
                timer.finish(size);
                Ok(())
            }
            Err(e) => {
                timer.fail(&e);
                Err(e)
            }
        }
    }

    /// Load and deserialize the object at the store's path
    ///
    /// # Errors
    /// * `StowError::NotFound` - nothing is stored at the path
    /// * `StowError::EmptyData` - the path holds zero bytes
    /// * `StowError::CorruptData` - the bytes do not decode
    /// * `StowError::Read` - the backend failed while reading
    pub fn load<T: Persistable>(&self) -> Result<T> {
        self.load_at("load", &self.path)
    }

    /// Load the object stored at `location`, typically a history entry
    pub fn load_from<T: Persistable>(&self, location: &str) -> Result<T> {
        self.load_at("load_from", location)
    }

    /// History entries of this store, oldest first
    ///
    /// Entry names embed a UTC stamp that is never older than the newest
    /// existing entry of the path, so name order is rotation order even when
    /// the wall clock steps back.
    pub fn history(&self) -> Result<Vec<String>> {
        let entries = self
            .backend
            .list(parent_of(&self.path))
            .map_err(|e| StowError::read(parent_of(&self.path), e))?;

        Ok(entries
            .into_iter()
            .filter(|entry| is_history_entry(&self.path, entry))
            .collect())
    }

    /// Make a history entry current again
    ///
    /// The current object (if any) is rotated into history first, whether or
    /// not history is enabled, so a restore never destroys a version.
    pub fn restore(&self, entry: &str) -> Result<()> {
        if !is_history_entry(&self.path, entry) {
            return Err(StowError::validation(format!(
                "{entry} is not a history entry of {}",
                self.path
            )));
        }

        let timer = OperationTimer::start("restore");
        let result = self
            .read_checked(entry)
            .and_then(|bytes| self.write_versioned(&bytes, true).map(|_| bytes.len()));

        match result {
            Ok(size) => {
                info!(path = %self.path, entry = %entry, "Restored history entry");
                timer.finish(size);
                Ok(())
            }
            Err(e) => {
                timer.fail(&e);
                Err(e)
            }
        }
    }

    /// Delete all but the newest `keep` history entries, newest meaning
    /// last in [`VersionedStore::history`] order
    ///
    /// Returns how many entries were removed.
    pub fn prune_history(&self, keep: usize) -> Result<usize> {
        let entries = self.history()?;
        let excess = entries.len().saturating_sub(keep);

        for entry in &entries[..excess] {
            self.backend.delete(entry)?;
            debug!(path = %self.path, entry = %entry, "Pruned history entry");
        }

        if excess > 0 {
            info!(path = %self.path, removed = excess, kept = entries.len() - excess, "Pruned history");
        }
        Ok(excess)
    }

    fn load_at<T: Persistable>(&self, operation: &'static str, location: &str) -> Result<T> {
        let timer = OperationTimer::start(operation);

        let result = self.read_checked(location).and_then(|bytes| {
            let object: T = self.serializer.deserialize(&bytes)?;
            Ok((object, bytes.len()))
        });

        match result {
            Ok((object, size)) => {
                timer.finish(size);
                Ok(object)
            }
            Err(e) => {
                timer.fail(&e);
                Err(e)
            }
        }
    }

    /// Existence check, read and empty check for `location`
    fn read_checked(&self, location: &str) -> Result<Vec<u8>> {
        let present = self
            .backend
            .exists(location)
            .map_err(|e| StowError::read(location, e))?;
        if !present {
            return Err(StowError::NotFound(location.to_string()));
        }

        let bytes = self.backend.read(location).map_err(|e| match e {
            StowError::NotFound(path) => StowError::NotFound(path),
            other => StowError::read(location, other),
        })?;

        if bytes.is_empty() {
            return Err(StowError::EmptyData(location.to_string()));
        }
        Ok(bytes)
    }

    /// Write `bytes` to the store's path, rotating the present object first
    /// when `rotate` is set. Returns the history entry created, if any.
    fn write_versioned(&self, bytes: &[u8], rotate: bool) -> Result<Option<String>> {
        let history_path = if rotate { self.rotate_current()? } else { None };

        if let Err(e) = self.backend.write(&self.path, bytes) {
            if let Some(history_path) = &history_path {
                warn!(
                    path = %self.path,
                    history_path = %history_path,
                    error = %e,
                    "Write failed after rotation; previous version remains in history"
                );
            }
            return Err(StowError::persist_write(&self.path, e));
        }

        info!(
            path = %self.path,
            size = bytes.len(),
            history_path = history_path.as_deref().unwrap_or("-"),
            "Saved object"
        );
        Ok(history_path)
    }

    /// Move the present object (if any) to a fresh history entry
    fn rotate_current(&self) -> Result<Option<String>> {
        let occupied = self.backend.exists(&self.path).map_err(|e| {
            StowError::history_creation(&self.path, self.history_pattern(), e)
        })?;
        if !occupied {
            return Ok(None);
        }

        let history_path = self.next_history_path()?;
        self.backend
            .rename(&self.path, &history_path)
            .map_err(|e| StowError::history_creation(&self.path, &history_path, e))?;

        // A rename is not trusted until the entry is seen at its new location
        let landed = self
            .backend
            .exists(&history_path)
            .map_err(|e| StowError::history_creation(&self.path, &history_path, e))?;
        if !landed {
            return Err(StowError::history_creation(
                &self.path,
                &history_path,
                StowError::rename_failed(&self.path, &history_path, "entry missing after rename"),
            ));
        }

        record_history_rotation();
        info!(path = %self.path, history_path = %history_path, "Rotated previous version into history");
        Ok(Some(history_path))
    }

    /// First unused `{path}-{stamp}-{seq}.old` sorting after every existing entry
    ///
    /// The stamp is the current UTC time unless the newest entry already
    /// carries a stamp at or beyond it (the wall clock stepped back, or
    /// another host runs ahead). Then that stamp is reused with a higher
    /// sequence number, keeping name order equal to rotation order.
    fn next_history_path(&self) -> Result<String> {
        let now = Utc::now().format("%Y%m%d%H%M%S%6f").to_string();
        let newest = self
            .history()
            .map_err(|e| StowError::history_creation(&self.path, self.history_pattern(), e))?
            .pop();

        let (stamp, first_seq) = match newest
            .as_deref()
            .and_then(|entry| history_discriminator(&self.path, entry))
        {
            Some((last_stamp, last_seq)) if last_stamp >= now.as_str() => {
                warn!(
                    path = %self.path,
                    newest = %last_stamp,
                    now = %now,
                    "Clock is behind the newest history entry"
                );
                (last_stamp.to_string(), last_seq + 1)
            }
            _ => (now, 0),
        };

        for seq in first_seq..MAX_HISTORY_PROBES {
            let candidate = history_entry_name(&self.path, &stamp, seq);
            let taken = self
                .backend
                .exists(&candidate)
                .map_err(|e| StowError::history_creation(&self.path, &candidate, e))?;
            if !taken {
                return Ok(candidate);
            }
        }

        Err(StowError::history_creation(
            &self.path,
            self.history_pattern(),
            StowError::storage(format!(
                "no free history slot after {MAX_HISTORY_PROBES} probes"
            )),
        ))
    }

    fn history_pattern(&self) -> String {
        format!("{}-*.{HISTORY_EXTENSION}", self.path)
    }
}

impl<S: Serializer> std::fmt::Debug for VersionedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("path", &self.path)
            .field("format", &self.serializer.format_name())
            .field("history", &self.history)
            .finish()
    }
}

fn history_entry_name(path: &str, stamp: &str, seq: u32) -> String {
    format!("{path}-{stamp}-{seq:0width$}.{HISTORY_EXTENSION}", width = SEQ_LEN)
}

/// Whether `entry` is a history entry created for `path`
pub fn is_history_entry(path: &str, entry: &str) -> bool {
    history_discriminator(path, entry).is_some()
}

/// The stamp and sequence number of a history entry of `path`
fn history_discriminator<'a>(path: &str, entry: &'a str) -> Option<(&'a str, u32)> {
    let rest = entry.strip_prefix(path)?.strip_prefix('-')?;
    let discriminator = rest
        .strip_suffix(HISTORY_EXTENSION)?
        .strip_suffix('.')?;
    let (stamp, seq) = discriminator.split_once('-')?;
    let well_formed = stamp.len() == STAMP_LEN
        && seq.len() == SEQ_LEN
        && stamp.bytes().all(|b| b.is_ascii_digit())
        && seq.bytes().all(|b| b.is_ascii_digit());
    if !well_formed {
        return None;
    }
    Some((stamp, seq.parse().ok()?))
}

/// Object-safe view of a store, for callers holding stores of different
/// serializers behind one type
///
/// Works on raw serialized bytes; decoding stays with the caller.
pub trait StoreInterface: Send + Sync {
    fn path(&self) -> &str;
    fn exists(&self) -> Result<bool>;
    fn load_bytes(&self) -> Result<Vec<u8>>;
    fn load_bytes_from(&self, location: &str) -> Result<Vec<u8>>;
    fn history(&self) -> Result<Vec<String>>;
    fn restore(&self, entry: &str) -> Result<()>;
    fn prune_history(&self, keep: usize) -> Result<usize>;
}

impl<S: Serializer> StoreInterface for VersionedStore<S> {
    fn path(&self) -> &str {
        VersionedStore::path(self)
    }

    fn exists(&self) -> Result<bool> {
        VersionedStore::exists(self)
    }

    fn load_bytes(&self) -> Result<Vec<u8>> {
        self.read_checked(&self.path)
    }

    fn load_bytes_from(&self, location: &str) -> Result<Vec<u8>> {
        self.read_checked(location)
    }

    fn history(&self) -> Result<Vec<String>> {
        VersionedStore::history(self)
    }

    fn restore(&self, entry: &str) -> Result<()> {
        VersionedStore::restore(self, entry)
    }

    fn prune_history(&self, keep: usize) -> Result<usize> {
        VersionedStore::prune_history(self, keep)
    }
}
