//! Error types for the subscription engine.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("No open connection")]
    NotConnected,

    #[error("Failed to close connection: {0}")]
    Close(String),

    #[error("Binding already live for subject: {0}")]
    DuplicateBinding(String),

    #[error("Binding rejected for {subject} on stream {stream}: {reason}")]
    BindingRejected {
        subject: String,
        stream: String,
        reason: String,
    },

    #[error("Teardown failed for {subject}: {reason}")]
    Teardown { subject: String, reason: String },

    #[error("Policy violation for {subject}: {reason}")]
    PolicyViolation { subject: String, reason: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown subscription group: {0}")]
    UnknownGroup(String),

    #[error("Invalid catalog: {0}")]
    Catalog(String),

    #[error("Engine is shut down")]
    Shutdown,
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Decode(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
