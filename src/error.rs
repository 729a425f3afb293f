//! Error types for bsdebug.

use thiserror::Error;

/// Main error type for all debugger operations.
#[derive(Debug, Error)]
pub enum DebugError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while building a message from structured data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The buffer does not yet hold a complete frame. Recoverable: the
    /// caller retries once more bytes arrive.
    #[error("buffer does not hold a complete frame")]
    ShortRead,

    /// Handshake magic mismatch. Fatal to the session.
    #[error("handshake magic mismatch: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: String, actual: String },

    /// A response referenced a request id that is not in the pending table.
    /// The session is considered desynchronized.
    #[error("response references unknown request id {0}")]
    UnknownRequestId(u32),

    /// A command code outside the known enum arrived on the wire.
    #[error("unknown command code {0}")]
    UnknownCommandCode(u32),

    /// An update type outside the known enum arrived on the wire.
    #[error("unknown update type {0}")]
    UnknownUpdateType(u32),

    /// Malformed frame body (e.g. unterminated string inside a frame whose
    /// declared length is fully present).
    #[error("malformed frame: {0}")]
    Decode(String),

    /// A stopped-gated command was invoked while the device is running (or
    /// `pause` while it is already stopped). No request was issued.
    #[error("operation not valid in the current run state")]
    NotStopped,

    /// Connection closed; all pending requests have been failed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl DebugError {
    /// Whether the parser may simply wait for more bytes.
    #[inline]
    pub fn is_short_read(&self) -> bool {
        matches!(self, DebugError::ShortRead)
    }
}

/// Result type alias using DebugError.
pub type Result<T> = std::result::Result<T, DebugError>;
