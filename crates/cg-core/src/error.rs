//! Error types for cg-core

use thiserror::Error;

/// Main error type for cg-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid media payload: {0}")]
    InvalidMediaPayload(String),

    #[error("{0} messages are not supported")]
    UnsupportedMessageKind(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Graph connection lock poisoned")]
    ConnectionPoisoned,

    #[error("Invalid conversation id: {0}")]
    InvalidConversationId(String),

    #[error("Malformed graph record: {0}")]
    MalformedRecord(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure came from the database rather than from the data.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::ConnectionPoisoned)
    }
}

/// Result type alias for cg-core
pub type Result<T> = std::result::Result<T, Error>;
