//! Error types for the proxy group manager

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the proxy group manager.
///
/// Cache-level conditions (unknown group or proxy ids) are never errors;
/// only transport, decoding and configuration problems are surfaced.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// IPC endpoint could not be reached or written to
    #[error("IPC transport error: {0}")]
    Transport(String),

    /// Payload does not match the fixed layout of its message kind
    #[error("Malformed {kind} payload: expected {expected}, got {actual} bytes")]
    MalformedPayload {
        kind: &'static str,
        expected: String,
        actual: usize,
    },

    /// Sync response carried a mode byte outside NONE/FULL/PARTIAL
    #[error("Unknown proxy sync mode: {0}")]
    UnknownSyncMode(u8),

    /// Frame header announced a payload above the configured limit
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// Group snapshot could not be loaded or parsed
    #[error("Group snapshot error: {0}")]
    Snapshot(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service loop is no longer accepting messages
    #[error("Proxy group service is stopped")]
    ServiceStopped,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed payload error.
    pub fn malformed(kind: &'static str, expected: impl Into<String>, actual: usize) -> Self {
        Error::MalformedPayload {
            kind,
            expected: expected.into(),
            actual,
        }
    }

    /// Returns true for errors caused by the peer being unreachable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Io(_))
    }
}
