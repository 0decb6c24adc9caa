/*!
Backend selection.

The set of media is closed: [`StorageKind`] names them and cargo features
decide which are compiled in. Asking for a medium that was left out of the
build is a typed [`StowError::BackendUnavailable`], never a silent fallback.
*/

use crate::config::{StorageConfig, StorageKind};
use crate::storage::{MemoryStorage, StorageBackend};
use crate::store::VersionedStore;
use crate::{Result, StowError};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the backend described by `config`
///
/// # Errors
/// * `StowError::Validation` - the configuration is incomplete
/// * `StowError::BackendUnavailable` - the medium is not compiled in
/// * any error the medium raises while connecting
///
/// # Example
/// ```rust
/// use stow_core::{create_backend, StorageConfig};
///
/// let backend = create_backend(&StorageConfig::memory())?;
/// backend.write("a.model", b"bytes")?;
/// assert!(backend.exists("a.model")?);
/// # Ok::<(), stow_core::StowError>(())
/// ```
pub fn create_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    config.validate()?;

    let backend: Arc<dyn StorageBackend> = match config.backend {
        StorageKind::Local => local_backend(config)?,
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::S3 => s3_backend(config)?,
    };

    info!(backend = %config.backend, "Created storage backend");
    Ok(backend)
}

/// The default persistent backend: the local filesystem
///
/// Fails with `BackendUnavailable` when built without the `local` feature.
pub fn default_backend() -> Result<Arc<dyn StorageBackend>> {
    create_backend(&StorageConfig::default_local())
}

/// Open a store for a URI such as `/var/models/a.model`, `memory://a.model`
/// or `s3://bucket/models/a.model`
pub fn open_store(uri: &str, history: bool) -> Result<VersionedStore> {
    let (config, path) = StorageConfig::from_uri(uri)?;
    if path.is_empty() {
        return Err(StowError::validation(format!("{uri} names no object path")));
    }

    let backend = create_backend(&config)?;
    if history && !backend.capabilities().atomic_rename {
        warn!(
            backend = %config.backend,
            path = %path,
            "Backend renames by copy and delete; history rotation is not atomic"
        );
    }

    Ok(VersionedStore::new(path, backend).with_history(history))
}

#[cfg(feature = "local")]
fn local_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    use crate::storage::LocalFileStorage;

    Ok(match &config.local_base_path {
        Some(base) => Arc::new(LocalFileStorage::with_base_dir(base)),
        None => Arc::new(LocalFileStorage::new()),
    })
}

#[cfg(not(feature = "local"))]
fn local_backend(_config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    Err(StowError::BackendUnavailable(
        "local filesystem support not compiled in (enable the `local` feature)".to_string(),
    ))
}

#[cfg(feature = "s3")]
fn s3_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    use crate::storage::S3StorageAdapter;

    let bucket = config
        .s3_bucket
        .clone()
        .ok_or_else(|| StowError::validation("S3 bucket name is required for S3 backend"))?;
    Ok(Arc::new(S3StorageAdapter::new(
        bucket,
        config.s3_region.clone(),
    )?))
}

#[cfg(not(feature = "s3"))]
fn s3_backend(_config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    Err(StowError::BackendUnavailable(
        "S3 support not compiled in (enable the `s3` feature)".to_string(),
    ))
}
