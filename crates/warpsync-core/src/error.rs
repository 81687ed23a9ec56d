//! Error types for warpsync

use thiserror::Error;

use crate::{ConnectionId, SubspaceId};

/// Core warpsync errors
#[derive(Error, Debug)]
pub enum WarpError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message tag: {0}")]
    UnknownMessageTag(i32),

    // Registry errors
    #[error("Unknown subspace: {0}")]
    UnknownSubspace(SubspaceId),

    // Persistence errors
    #[error("Subspace record I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed subspace record: {0}")]
    MalformedRecord(String),

    // Connection errors
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Channel closed for connection {0}")]
    ChannelClosed(ConnectionId),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for warpsync operations
pub type WarpResult<T> = Result<T, WarpError>;
