//! Failure taxonomy for broker operations.
//!
//! An operation running against a broker connection can fail in two very
//! different ways:
//!
//! - The **transport** broke: the socket was reset, the node became unreachable,
//!   the broker closed the connection. The connection must be rebuilt before the
//!   operation can succeed again.
//! - The **application** failed: the operation itself decided the work could not
//!   be done. Reconnecting would not help.
//!
//! Operations signal which one happened by returning an [`OperationError`]. Only
//! [`OperationError::Transport`] triggers connection recovery.
//!
//! ```rust
//! use broker_resilience_core::{OperationError, TransportError};
//!
//! fn publish(ok: bool) -> Result<(), OperationError> {
//!     if ok {
//!         Ok(())
//!     } else {
//!         Err(TransportError::connection_reset("socket closed by peer").into())
//!     }
//! }
//!
//! assert!(publish(false).unwrap_err().is_transport());
//! ```

use std::fmt;
use std::io;

/// Boxed error used for application failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// No broker accepted the connection.
    Refused,
    /// An established connection was reset or aborted.
    Reset,
    /// The connection (or the channel it backs) is already closed.
    Closed,
    /// The broker could not be reached at all.
    Unreachable,
    /// The broker did not answer in time.
    TimedOut,
    /// Anything else the transport reported.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Refused => "connection refused",
            TransportErrorKind::Reset => "connection reset",
            TransportErrorKind::Closed => "connection closed",
            TransportErrorKind::Unreachable => "broker unreachable",
            TransportErrorKind::TimedOut => "timed out",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(label)
    }
}

/// A failure of the connection to the broker.
///
/// Cheap to clone so it can travel inside events and recovery errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    /// Creates a transport error of the given kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// No broker accepted the connection.
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Refused, message)
    }

    /// An established connection was reset.
    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Reset, message)
    }

    /// The connection is already closed.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    /// Returns the failure classification.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportErrorKind::Reset,
            io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof => {
                TransportErrorKind::Closed
            }
            io::ErrorKind::AddrNotAvailable => TransportErrorKind::Unreachable,
            io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
            _ => TransportErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

/// Error returned by an operation executed against a broker connection.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The connection failed; recovery should rebuild it.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The operation failed for its own reasons; recovery would not help.
    #[error("application error: {0}")]
    Application(#[source] BoxError),
}

impl OperationError {
    /// Wraps an application failure.
    pub fn application<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        OperationError::Application(error.into())
    }

    /// Returns `true` if this failure requires reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, OperationError::Transport(_))
    }

    /// Returns `true` if this is an application failure.
    pub fn is_application(&self) -> bool {
        matches!(self, OperationError::Application(_))
    }

    /// Returns the transport failure, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            OperationError::Transport(e) => Some(e),
            OperationError::Application(_) => None,
        }
    }
}

// io::Error is what most broker clients surface for socket trouble.
impl From<io::Error> for OperationError {
    fn from(err: io::Error) -> Self {
        OperationError::Transport(err.into())
    }
}
