/*!
Error types for the stow core library.
*/

use thiserror::Error;

/// Result type used throughout stow.
pub type Result<T> = std::result::Result<T, StowError>;

/// Errors that can occur while persisting or restoring objects.
#[derive(Error, Debug)]
pub enum StowError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors while serializing an object
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Stored bytes do not decode to a valid object
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Stored content has zero length, usually left behind by a crashed writer
    #[error("Target contains no data: {0}")]
    EmptyData(String),

    /// Nothing is stored at the requested path
    #[error("Target does not exist: {0}")]
    NotFound(String),

    /// The medium rejected a write
    #[error("Write to {path} failed: {reason}")]
    WriteFailed { path: String, reason: String },

    /// The medium could not move an entry
    #[error("Rename of {from} to {to} failed: {reason}")]
    RenameFailed {
        from: String,
        to: String,
        reason: String,
    },

    /// Any other backend failure (read, list, delete, connection)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Save phase failure: the serialized object could not be written
    #[error("Could not write to storage at {path}: {source}")]
    PersistWrite {
        path: String,
        #[source]
        source: Box<StowError>,
    },

    /// Save phase failure: the previous object could not be moved into history
    #[error("Failed to create history file {history_path} for {path}: {source}")]
    HistoryCreation {
        path: String,
        history_path: String,
        #[source]
        source: Box<StowError>,
    },

    /// Load phase failure: the stored bytes could not be read
    #[error("Could not read from storage at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: Box<StowError>,
    },

    /// The configured backend is not compiled in or cannot be used
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl StowError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new corrupt data error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::CorruptData(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new write failure for `path`
    pub fn write_failed<P: Into<String>, R: ToString>(path: P, reason: R) -> Self {
        Self::WriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new rename failure for `from` -> `to`
    pub fn rename_failed<F, T, R>(from: F, to: T, reason: R) -> Self
    where
        F: Into<String>,
        T: Into<String>,
        R: ToString,
    {
        Self::RenameFailed {
            from: from.into(),
            to: to.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a backend error raised while writing the new object
    pub fn persist_write<P: Into<String>>(path: P, source: StowError) -> Self {
        Self::PersistWrite {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a backend error raised while rotating the old object into history
    pub fn history_creation<P, H>(path: P, history_path: H, source: StowError) -> Self
    where
        P: Into<String>,
        H: Into<String>,
    {
        Self::HistoryCreation {
            path: path.into(),
            history_path: history_path.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a backend error raised while reading stored bytes
    pub fn read<P: Into<String>>(path: P, source: StowError) -> Self {
        Self::Read {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Short machine-friendly name of the failure, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Compression(_) => "compression",
            Self::CorruptData(_) => "corrupt_data",
            Self::EmptyData(_) => "empty_data",
            Self::NotFound(_) => "not_found",
            Self::WriteFailed { .. } => "write_failed",
            Self::RenameFailed { .. } => "rename_failed",
            Self::Storage(_) => "storage",
            Self::PersistWrite { .. } => "persist_write",
            Self::HistoryCreation { .. } => "history_creation",
            Self::Read { .. } => "read",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Validation(_) => "validation",
        }
    }
}
