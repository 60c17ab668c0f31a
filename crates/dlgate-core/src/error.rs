//! Error types for DLGate core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in DLGate core
#[derive(Debug, Error)]
pub enum DlgateError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Body length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("Destination already owned by transfer {id}: {}", .path.display())]
    DestinationInUse { id: String, path: PathBuf },

    #[error("Destination is locked by another writer: {}", .0.display())]
    DestinationLocked(PathBuf),

    #[error("Invalid destination: {}", .0.display())]
    InvalidDestination(PathBuf),

    #[error("Request queue is closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DlgateError {
    /// HTTP status behind this error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            DlgateError::ServerError { status, .. } => Some(*status),
            DlgateError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// Allow converting to String for callback payloads
impl From<DlgateError> for String {
    fn from(error: DlgateError) -> Self {
        error.to_string()
    }
}
