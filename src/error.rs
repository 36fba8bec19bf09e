//! Error types for the OpalKV client
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for OpalKV client operations
#[derive(Debug, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    /// Malformed or truncated frame. Always fatal to the decode attempt.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    /// Handshake failure or timeout, connect failure, or exhaustion of
    /// reconnect attempts.
    #[error("Connection error: {0}")]
    Connection(String),

    // -------------------------------------------------------------------------
    // Command Errors
    // -------------------------------------------------------------------------
    /// The server answered a specific command with a non-empty error, or
    /// the local write for that command failed.
    #[error("Command error: {0}")]
    Command(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    /// An operation was invoked in the wrong lifecycle state (e.g. execute
    /// before a successful handshake).
    #[error("Invalid state: {0}")]
    State(String),
}

impl ClientError {
    /// True if this error came back from the server for one command, as
    /// opposed to a transport-level failure.
    pub fn is_command_error(&self) -> bool {
        matches!(self, ClientError::Command(_))
    }
}
