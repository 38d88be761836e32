//! Error types for Sundew.
//!
//! Library crates use [`SundewError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Fetch failures are deliberately absent here: the content source reports
//! them through its own outcome type so the ingestion cycle can branch on
//! transient versus fatal without inspecting error values.

use std::path::PathBuf;

/// Top-level error type for all Sundew operations.
#[derive(Debug, thiserror::Error)]
pub enum SundewError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Missing or rejected credentials for an external collaborator.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Network/HTTP error outside the fetch path (client construction etc.).
    #[error("network error: {0}")]
    Network(String),

    /// Checkpoint storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// An item could not be transformed.
    #[error("transform error for item {item_id}: {message}")]
    Transform { item_id: String, message: String },

    /// The output sink failed to persist a batch.
    #[error("output error: {0}")]
    Output(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed batch file, invalid record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The background worker panicked or was aborted.
    #[error("worker error: {0}")]
    Worker(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SundewError>;

impl SundewError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a transform error for the given item.
    pub fn transform(item_id: impl ToString, msg: impl Into<String>) -> Self {
        Self::Transform {
            item_id: item_id.to_string(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the whole process rather than one account.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::Authentication(_)
                | Self::Transform { .. }
                | Self::Worker(_)
        )
    }
}
