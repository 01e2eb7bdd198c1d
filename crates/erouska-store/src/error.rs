//! Error types for erouska-store.

use std::path::PathBuf;

/// Result type for erouska-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in erouska-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database was written by a newer version.
    #[error("Unsupported schema version {found} (supported up to {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
