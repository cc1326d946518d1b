//! Error types for the runtime core.
//!
//! The taxonomy is closed: every failure the core can surface maps onto one
//! of these kinds, and callers pattern-match rather than downcast.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the runtime core.
#[derive(Debug, Error)]
pub enum Error {
    /// No such queued response, descriptor, or resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request could not be parsed (bad id, malformed message).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A WebSocket frame or handshake violated the protocol.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// An operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The peer aborted the request.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The core is shutting down; no new work is accepted.
    #[error("Core is closed")]
    Closed,

    /// Unexpected reactor or I/O failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The error type name used in JSON error bodies
    /// (e.g. `"NotFoundError"`, `"TimeoutError"`).
    pub fn type_name(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFoundError",
            Error::BadRequest(_) => "BadRequestError",
            Error::ProtocolViolation(_) => "ProtocolError",
            Error::Timeout(_) => "TimeoutError",
            Error::Cancelled(_) => "AbortError",
            Error::Closed => "ClosedError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Serialises the error as the `{"err": {...}}` body handlers write
    /// back to the render process.
    pub fn json(&self) -> serde_json::Value {
        serde_json::json!({
            "err": {
                "message": self.to_string(),
                "type": self.type_name(),
            }
        })
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns true if the operation failed because the core shut down.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
