//! Configuration for storage backend selection
//!
//! A [`StorageConfig`] names which medium a store should use and how to reach
//! it. [`crate::factory::create_backend`] turns it into a live backend.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Enumeration of supported storage media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Local filesystem storage
    Local,
    /// Process-local in-memory storage
    Memory,
    /// Amazon S3 object storage
    S3,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageKind::Local => "local",
            StorageKind::Memory => "memory",
            StorageKind::S3 => "s3",
        };
        f.write_str(name)
    }
}

/// Storage backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// The storage medium to use
    pub backend: StorageKind,
    /// S3 bucket name (required for S3 backend)
    pub s3_bucket: Option<String>,
    /// AWS region for S3 operations (optional, defaults to environment)
    pub s3_region: Option<String>,
    /// Base directory for local storage (optional, paths used as-is otherwise)
    pub local_base_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Local filesystem storage with no base directory
    pub fn default_local() -> Self {
        StorageConfig {
            backend: StorageKind::Local,
            s3_bucket: None,
            s3_region: None,
            local_base_path: None,
        }
    }

    /// Local filesystem storage rooted at `base_path`
    pub fn local_with_base(base_path: impl Into<PathBuf>) -> Self {
        StorageConfig {
            local_base_path: Some(base_path.into()),
            ..Self::default_local()
        }
    }

    /// In-memory storage
    pub fn memory() -> Self {
        StorageConfig {
            backend: StorageKind::Memory,
            ..Self::default_local()
        }
    }

    /// S3 storage in the given bucket
    pub fn s3_with_bucket(bucket: String) -> Self {
        StorageConfig {
            backend: StorageKind::S3,
            s3_bucket: Some(bucket),
            s3_region: None,
            local_base_path: None,
        }
    }

    /// S3 storage in the given bucket and region
    pub fn s3_with_bucket_and_region(bucket: String, region: String) -> Self {
        StorageConfig {
            s3_region: Some(region),
            ..Self::s3_with_bucket(bucket)
        }
    }

    /// Parse a storage URI into a configuration and the logical path it names
    ///
    /// Supports:
    /// - `s3://bucket-name/key` for S3 storage
    /// - `memory://key` for in-memory storage
    /// - anything else as a local filesystem path
    pub fn from_uri(uri: &str) -> crate::Result<(StorageConfig, String)> {
        if let Some(s3_part) = uri.strip_prefix("s3://") {
            let (bucket, key) = s3_part.split_once('/').unwrap_or((s3_part, ""));
            if bucket.is_empty() {
                return Err(crate::StowError::validation(
                    "Invalid S3 URI: missing bucket name",
                ));
            }
            Ok((StorageConfig::s3_with_bucket(bucket.to_string()), key.to_string()))
        } else if let Some(key) = uri.strip_prefix("memory://") {
            Ok((StorageConfig::memory(), key.to_string()))
        } else {
            Ok((StorageConfig::default_local(), uri.to_string()))
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        match self.backend {
            StorageKind::S3 => {
                if self.s3_bucket.as_deref().map_or(true, str::is_empty) {
                    return Err(crate::StowError::validation(
                        "S3 backend requires a valid bucket name",
                    ));
                }
            }
            StorageKind::Local => {
                if let Some(base) = &self.local_base_path {
                    if base.as_os_str().is_empty() {
                        return Err(crate::StowError::validation(
                            "local base path cannot be empty",
                        ));
                    }
                }
            }
            StorageKind::Memory => {}
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::default_local()
    }
}
