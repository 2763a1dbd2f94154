//! Error types for monitoring and persistence.

use thiserror::Error;

/// Errors that keep a monitoring session from starting or running.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("a monitoring session is already running")]
    AlreadyMonitoring,
    #[error("audio source error: {0}")]
    Source(String),
}

/// Errors raised by a key-value store.
///
/// Callers inside the crate log these and carry on with defaults; only
/// explicit user actions such as exporting history report them.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
