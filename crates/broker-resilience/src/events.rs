use std::sync::Arc;
use std::time::{Duration, Instant};

use broker_resilience_core::{EventListeners, ResilienceEvent, TransportError};

/// Events emitted by a [`ResilientClient`](crate::ResilientClient).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A new connection was installed.
    Connected {
        client_name: String,
        timestamp: Instant,
        generation: u64,
    },
    /// A single connect attempt failed.
    ConnectFailed {
        client_name: String,
        timestamp: Instant,
        error: TransportError,
    },
    /// The broker or the network closed the connection.
    RemoteShutdown {
        client_name: String,
        timestamp: Instant,
        generation: u64,
        reason: String,
    },
    /// A recovery episode is about to sleep, then reconnect.
    ReconnectAttempt {
        client_name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
    },
    /// A recovery episode installed a new connection.
    Recovered {
        client_name: String,
        timestamp: Instant,
        attempts: u32,
        generation: u64,
    },
    /// A bounded recovery episode gave up.
    RecoveryExhausted {
        client_name: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// An operation hit a transport failure.
    OperationFailed {
        client_name: String,
        timestamp: Instant,
        operation_id: String,
        error: TransportError,
        fail_fast: bool,
    },
    /// A durable operation was replayed on a recovered connection.
    Replayed {
        client_name: String,
        timestamp: Instant,
        operation_id: String,
        succeeded: bool,
    },
    /// The client was shut down.
    Shutdown {
        client_name: String,
        timestamp: Instant,
    },
}

impl ResilienceEvent for ClientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Connected { .. } => "connected",
            ClientEvent::ConnectFailed { .. } => "connect_failed",
            ClientEvent::RemoteShutdown { .. } => "remote_shutdown",
            ClientEvent::ReconnectAttempt { .. } => "reconnect_attempt",
            ClientEvent::Recovered { .. } => "recovered",
            ClientEvent::RecoveryExhausted { .. } => "recovery_exhausted",
            ClientEvent::OperationFailed { .. } => "operation_failed",
            ClientEvent::Replayed { .. } => "replayed",
            ClientEvent::Shutdown { .. } => "shutdown",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ClientEvent::Connected { timestamp, .. }
            | ClientEvent::ConnectFailed { timestamp, .. }
            | ClientEvent::RemoteShutdown { timestamp, .. }
            | ClientEvent::ReconnectAttempt { timestamp, .. }
            | ClientEvent::Recovered { timestamp, .. }
            | ClientEvent::RecoveryExhausted { timestamp, .. }
            | ClientEvent::OperationFailed { timestamp, .. }
            | ClientEvent::Replayed { timestamp, .. }
            | ClientEvent::Shutdown { timestamp, .. } => *timestamp,
        }
    }

    fn client_name(&self) -> &str {
        match self {
            ClientEvent::Connected { client_name, .. }
            | ClientEvent::ConnectFailed { client_name, .. }
            | ClientEvent::RemoteShutdown { client_name, .. }
            | ClientEvent::ReconnectAttempt { client_name, .. }
            | ClientEvent::Recovered { client_name, .. }
            | ClientEvent::RecoveryExhausted { client_name, .. }
            | ClientEvent::OperationFailed { client_name, .. }
            | ClientEvent::Replayed { client_name, .. }
            | ClientEvent::Shutdown { client_name, .. } => client_name,
        }
    }
}

/// Emits events stamped with the client's name and the current time.
#[derive(Clone)]
pub(crate) struct EventSink {
    client_name: Arc<str>,
    listeners: EventListeners<ClientEvent>,
}

impl EventSink {
    pub(crate) fn new(client_name: &str, listeners: EventListeners<ClientEvent>) -> Self {
        Self {
            client_name: Arc::from(client_name),
            listeners,
        }
    }

    pub(crate) fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Builds and delivers an event; skipped entirely when nobody listens.
    pub(crate) fn emit<F>(&self, build: F)
    where
        F: FnOnce(String, Instant) -> ClientEvent,
    {
        if self.listeners.is_empty() {
            return;
        }
        let event = build(self.client_name.to_string(), Instant::now());
        self.listeners.emit(&event);
    }
}
