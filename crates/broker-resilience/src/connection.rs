//! The broker-client collaborator.
//!
//! The engine never speaks the broker protocol. A broker client library is
//! plugged in by implementing [`Connector`] (open a session against the
//! candidate addresses) and [`BrokerConnection`] (the session handle).
//!
//! Remote shutdown notification is a one-shot signal per connection, built
//! with [`shutdown_channel`]: the connection keeps the [`ShutdownNotifier`] and
//! hands out the [`ShutdownListener`] when asked.

use futures::future::BoxFuture;
use tokio::sync::watch;

use broker_resilience_core::TransportError;

use crate::address::ConnectionSettings;

/// Opens broker connections.
pub trait Connector: Send + Sync + 'static {
    /// The connection handle this connector produces.
    type Connection: BrokerConnection;

    /// Makes one attempt to open a connection.
    ///
    /// Candidate addresses are tried in order and the first that accepts wins.
    /// Implementations must not retry on their own; recovery does that.
    fn connect<'a>(
        &'a self,
        settings: &'a ConnectionSettings,
    ) -> BoxFuture<'a, Result<Self::Connection, TransportError>>;
}

impl<T: Connector> Connector for std::sync::Arc<T> {
    type Connection = T::Connection;

    fn connect<'a>(
        &'a self,
        settings: &'a ConnectionSettings,
    ) -> BoxFuture<'a, Result<Self::Connection, TransportError>> {
        (**self).connect(settings)
    }
}

/// A live session to one broker node.
///
/// Shared between concurrently running operations through an `Arc`, so
/// implementations must be safe to use from several tasks at once.
pub trait BrokerConnection: Send + Sync + 'static {
    /// Whether the session is still usable.
    fn is_open(&self) -> bool;

    /// Closes the session from the application side.
    ///
    /// The shutdown signal emitted for this close must be
    /// [`ShutdownSignal::application`].
    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Subscribes to the shutdown signal of this session.
    ///
    /// Called exactly once, right after the connection is opened.
    fn shutdown_listener(&self) -> ShutdownListener;
}

/// Who initiated a connection shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownInitiator {
    /// The application closed the connection.
    Application,
    /// The broker or the network severed it.
    Remote,
}

/// Describes why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    initiator: ShutdownInitiator,
    reason: String,
}

impl ShutdownSignal {
    /// A close requested by the application.
    pub fn application(reason: impl Into<String>) -> Self {
        Self {
            initiator: ShutdownInitiator::Application,
            reason: reason.into(),
        }
    }

    /// An unsolicited close by the broker or the network.
    pub fn remote(reason: impl Into<String>) -> Self {
        Self {
            initiator: ShutdownInitiator::Remote,
            reason: reason.into(),
        }
    }

    /// Who initiated the shutdown.
    pub fn initiator(&self) -> ShutdownInitiator {
        self.initiator
    }

    /// Whether the application closed the connection itself.
    pub fn is_initiated_by_application(&self) -> bool {
        self.initiator == ShutdownInitiator::Application
    }

    /// Free-form reason reported by the broker client.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Creates a linked notifier/listener pair for one connection.
pub fn shutdown_channel() -> (ShutdownNotifier, ShutdownListener) {
    let (tx, rx) = watch::channel(None);
    (ShutdownNotifier { tx }, ShutdownListener { rx })
}

/// Sending half of a connection's shutdown signal. Owned by the connection.
#[derive(Debug)]
pub struct ShutdownNotifier {
    tx: watch::Sender<Option<ShutdownSignal>>,
}

impl ShutdownNotifier {
    /// Publishes the shutdown signal.
    ///
    /// Only the first signal counts; returns `false` if one was already sent.
    pub fn notify(&self, signal: ShutdownSignal) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(signal);
                true
            }
        })
    }

    /// Returns another listener for the same signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Whether a signal has been published.
    pub fn is_notified(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Receiving half of a connection's shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    /// Waits for the signal.
    ///
    /// Resolves to `None` if the notifier is dropped without ever signalling.
    pub async fn wait(mut self) -> Option<ShutdownSignal> {
        let signal = match self.rx.wait_for(Option::is_some).await {
            Ok(signal) => signal.clone(),
            Err(_) => None,
        };
        signal
    }
}
