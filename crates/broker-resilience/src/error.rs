//! Error types for the resilient client.

use broker_resilience_core::{BoxError, TransportError};

/// Errors surfaced to callers of [`ResilientClient`](crate::ResilientClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client was shut down; no connection will be opened again.
    #[error("client has been shut down")]
    Shutdown,

    /// A single connect attempt failed.
    #[error("could not connect to broker: {0}")]
    Transport(#[from] TransportError),

    /// A bounded recovery episode ran out of attempts.
    #[error("could not recover broker connection after {attempts} attempts")]
    RecoveryExhausted {
        /// Reconnect attempts made during the episode.
        attempts: u32,
        /// The failure of the last attempt, if any attempt was made.
        #[source]
        last_error: Option<TransportError>,
    },

    /// The operation reported an application failure. Recovery is not attempted.
    #[error("operation {operation_id} failed: {source}")]
    Application {
        /// Diagnostic id of the failing operation.
        operation_id: String,
        /// The application failure.
        #[source]
        source: BoxError,
    },
}

impl ClientError {
    /// Returns `true` if the client is terminated.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ClientError::Shutdown)
    }

    /// Returns `true` if a recovery episode gave up.
    pub fn is_recovery_exhausted(&self) -> bool {
        matches!(self, ClientError::RecoveryExhausted { .. })
    }
}

/// Invalid connection settings. Raised at construction and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No broker address was configured.
    #[error("at least one broker address is required")]
    NoAddresses,

    /// An address could not be parsed or is out of range.
    #[error("invalid broker address {address:?}: {reason}")]
    InvalidAddress {
        /// The offending input.
        address: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The virtual host name is empty.
    #[error("virtual host must not be empty")]
    EmptyVirtualHost,

    /// The user name is empty.
    #[error("username must not be empty")]
    EmptyUsername,
}
