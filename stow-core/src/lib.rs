/*!
# Stow Core

Versioned object persistence: serialize a value, store it at a logical path
on a pluggable medium, and keep every overwritten version as a history entry.

- Self-describing native format with content hashing and gzip compression
- Local filesystem, in-memory and (with the `s3` feature) Amazon S3 backends
- History rotation that never overwrites a version it could not preserve
- Opt-in per-path locking for concurrent writers

## Architecture

A [`VersionedStore`] binds one logical path to a [`Serializer`] and a shared
[`StorageBackend`]. Backends only move bytes; the store decides when a
previous version is rotated into history and how failures are reported.

## Usage

```rust
use std::sync::Arc;
use stow_core::{MemoryStorage, VersionedStore};

let store = VersionedStore::new("/models/classifier.model", Arc::new(MemoryStorage::new()))
    .with_history(true);

store.save(&vec!["spam".to_string(), "ham".to_string()])?;
store.save(&vec!["ham".to_string()])?;

let labels: Vec<String> = store.load()?;
assert_eq!(labels, vec!["ham".to_string()]);

let previous: Vec<String> = store.load_from(&store.history()?[0])?;
assert_eq!(previous.len(), 2);
# Ok::<(), stow_core::StowError>(())
```
*/

pub mod compression;
pub mod config;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod locking;
pub mod observability;
pub mod retry;
pub mod serializer;
pub mod storage;
pub mod store;


pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{StorageConfig, StorageKind};
pub use envelope::EnvelopeHeader;
pub use error::{Result, StowError};
pub use factory::{create_backend, default_backend, open_store};
pub use locking::{LockedStore, PathLocks};
pub use observability::{init_default_observability, init_observability};
pub use serializer::{JsonSerializer, NativeSerializer, Persistable, Serializer};
#[cfg(feature = "local")]
pub use storage::LocalFileStorage;
#[cfg(feature = "s3")]
pub use storage::S3StorageAdapter;
pub use storage::{BackendCapabilities, MemoryStorage, StorageBackend};
pub use store::{StoreInterface, VersionedStore};
