//! Error types for picocal.

use thiserror::Error;

/// Errors that can occur in picocal operations.
#[derive(Error, Debug)]
pub enum PicoCalError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Calendar access error: {0}")]
    CalendarAccess(String),

    #[error("Peer is not reachable")]
    PeerNotReachable,

    #[error("Peer did not reply within {0}s")]
    PeerTimeout(u64),

    #[error("Malformed peer message: {0}")]
    MalformedPeerMessage(String),

    #[error("Peer rejected message: {0}")]
    PeerRejected(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for picocal operations.
pub type PicoCalResult<T> = Result<T, PicoCalError>;
