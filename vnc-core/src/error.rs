//! Domain-specific error types for the VNC session core.
//!
//! All fallible operations return `Result<T, VncError>`. Errors raised
//! on the reader or sender threads never cross into caller code; they
//! are recorded as a state transition plus a reason string instead.

use thiserror::Error;

/// The canonical error type for the session core.
#[derive(Debug, Error)]
pub enum VncError {
    // ── Connection Errors ────────────────────────────────────────
    /// Handshake or transport failure while connecting.
    #[error("connection failed: {reason}")]
    Connection { reason: String },

    /// The message pump failed after a successful connect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A blocking engine call was aborted through `interrupt()`.
    ///
    /// Not a failure: callers should not surface this to users.
    #[error("operation cancelled")]
    Cancelled,

    // ── Caller Errors ────────────────────────────────────────────
    /// An operation was invoked in a state that does not allow it.
    #[error("invalid use of session: {0}")]
    Misuse(&'static str),

    /// The protocol engine could not be created.
    #[error("failed to allocate protocol engine: {0}")]
    Allocation(String),

    // ── Plumbing Errors ──────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl VncError {
    /// Build a connection error from a transport-level reason.
    pub fn connection(reason: impl Into<String>) -> Self {
        VncError::Connection {
            reason: reason.into(),
        }
    }

    /// Returns `true` for the interrupt-triggered unblock, which is not
    /// a user-visible failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VncError::Cancelled)
    }

    /// The human-readable reason a UI should render, if any.
    ///
    /// Cancellation yields `None`; everything else yields its display
    /// string.
    pub fn user_reason(&self) -> Option<String> {
        match self {
            VncError::Cancelled => None,
            VncError::Connection { reason } => Some(reason.clone()),
            other => Some(other.to_string()),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for VncError {
    fn from(s: String) -> Self {
        VncError::Other(s)
    }
}

impl From<&str> for VncError {
    fn from(s: &str) -> Self {
        VncError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = VncError::connection("Connection refused");
        assert!(e.to_string().contains("Connection refused"));

        let e = VncError::Misuse("connect called twice");
        assert!(e.to_string().contains("twice"));
    }

    #[test]
    fn cancellation_is_not_user_visible() {
        assert!(VncError::Cancelled.is_cancellation());
        assert_eq!(VncError::Cancelled.user_reason(), None);
        assert_eq!(
            VncError::connection("no route to host").user_reason(),
            Some("no route to host".to_string())
        );
    }

    #[test]
    fn from_string() {
        let e: VncError = "something broke".into();
        assert!(matches!(e, VncError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: VncError = io_err.into();
        assert!(matches!(e, VncError::Io(_)));
    }
}
