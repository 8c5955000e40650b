//! Error types for bus I/O operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during bus operations
///
/// Malformed or invalid message files never produce a `BusError`; they are
/// quarantined instead. Only environment failures and producer mistakes
/// reach the caller.
#[derive(Error, Debug)]
pub enum BusError {
    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a message for delivery
    #[error("JSON serialization error for {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to acquire the processed-log lock after multiple retries
    #[error("Failed to acquire lock on {path} after {retries} retries")]
    LockTimeout { path: PathBuf, retries: u32 },

    /// Producer attempted to send a message that would fail validation
    #[error("Refusing to send invalid message: {reason}")]
    InvalidMessage { reason: String },
}

impl BusError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BusError::Io {
            path: path.into(),
            source,
        }
    }
}
