//! Common error types for Farsight.

use thiserror::Error;

/// Result type alias using Farsight's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Farsight operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, bind, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] weft_core::WeftError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The peer or relay reported an error
    #[error("remote error: {0}")]
    Remote(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// WebSocket-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The underlying transport is gone
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a remote error from any displayable type.
    pub fn remote(msg: impl std::fmt::Display) -> Self {
        Self::Remote(msg.to_string())
    }

    /// Create a not found error from any displayable type.
    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create a transport-closed error from any displayable type.
    pub fn transport_closed(msg: impl std::fmt::Display) -> Self {
        Self::TransportClosed(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}
