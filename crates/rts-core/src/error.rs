//! Error taxonomy for the RuntimeScope collector.
//!
//! The collector never lets a local fault escape to the caller of an
//! unrelated operation. Every fallible path in `rts-store`, `rts-ingest`,
//! `rts-session`, and `rts-api` returns a [`CollectorError`], whose variant
//! family mirrors the taxonomy of spec section 7: `protocol`, `io`,
//! `storage`, `timeout`, `shutdown`, `not_found`.

use std::fmt;

/// Primary error type for all RuntimeScope collector operations.
///
/// Each variant corresponds to one of the six error kinds the collector
/// distinguishes. Use [`CollectorError::kind`] to recover the taxonomy
/// bucket for logging or HTTP status mapping without matching on every
/// variant.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Malformed frame, oversized payload, or a frame received while the
    /// connection was in the wrong state (e.g. an `event` frame before a
    /// `handshake`).
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable description of the protocol violation.
        message: String,
    },

    /// Socket read/write failure or a durable-log flush failure.
    #[error("io error: {message}")]
    Io {
        /// Description of the underlying I/O failure.
        message: String,
    },

    /// Storage-layer failure: schema migration failure (startup-fatal),
    /// unrecoverable corruption (non-fatal, logged and skipped), or a
    /// suppressed unique-constraint violation surfaced for visibility.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// A bounded wait expired: handshake, idle, command response, or HTTP
    /// handler budget.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A cancellation token fired while the operation was outstanding.
    #[error("shutdown in progress")]
    Shutdown,

    /// The referenced session, project, or HTTP route does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Coarse taxonomy bucket, used to decide retry/log/HTTP-status policy
/// without matching every variant at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Io,
    Storage,
    Timeout,
    Shutdown,
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::Io => "io",
            ErrorKind::Storage => "storage",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

impl CollectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::Protocol { .. } => ErrorKind::Protocol,
            CollectorError::Io { .. } => ErrorKind::Io,
            CollectorError::Storage { .. } => ErrorKind::Storage,
            CollectorError::Timeout(_) => ErrorKind::Timeout,
            CollectorError::Shutdown => ErrorKind::Shutdown,
            CollectorError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CollectorError::Protocol { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        CollectorError::Storage { message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CollectorError::NotFound(what.into())
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(error: std::io::Error) -> Self {
        CollectorError::Io { message: error.to_string() }
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(error: serde_json::Error) -> Self {
        CollectorError::Protocol { message: format!("invalid JSON: {error}") }
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for CollectorError {
    fn from(error: sqlx::Error) -> Self {
        CollectorError::Storage { message: error.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_each_variant() {
        assert_eq!(CollectorError::protocol("x").kind(), ErrorKind::Protocol);
        assert_eq!(CollectorError::Io { message: "x".into() }.kind(), ErrorKind::Io);
        assert_eq!(CollectorError::storage("x").kind(), ErrorKind::Storage);
        assert_eq!(CollectorError::Timeout("x".into()).kind(), ErrorKind::Timeout);
        assert_eq!(CollectorError::Shutdown.kind(), ErrorKind::Shutdown);
        assert_eq!(CollectorError::not_found("x").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: CollectorError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn json_error_converts_to_protocol() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CollectorError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
