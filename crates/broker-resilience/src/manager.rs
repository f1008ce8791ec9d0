//! Owns the single broker connection of a client.
//!
//! All connection creation, replacement and teardown goes through the slot
//! mutex, so at most one connection exists per client at any time. Every
//! installed connection gets a fresh generation number; recovery compares
//! generations to tell a stale failure report from a current one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};

use broker_resilience_core::TransportError;

use crate::address::ConnectionSettings;
use crate::connection::{BrokerConnection, Connector, ShutdownSignal};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventSink};
use crate::registry::DurableRegistry;
use crate::state::ClientState;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Called from a connection's watcher task when the broker or the network
/// closes it. Receives the generation of the lost connection.
pub(crate) type ShutdownHook = Arc<dyn Fn(u64, ShutdownSignal) + Send + Sync>;

/// The current connection and the generation it was installed under.
pub(crate) struct Slot<C> {
    connection: Option<Arc<C>>,
    generation: u64,
    exhausted: Option<Exhausted>,
}

/// The last recovery episode that ran out of attempts. Cleared once a
/// connection is installed again.
struct Exhausted {
    epoch: u64,
    attempts: u32,
    last_error: Option<TransportError>,
}

impl<C: BrokerConnection> Slot<C> {
    pub(crate) fn open_lease(&self) -> Option<Lease<C>> {
        self.connection
            .as_ref()
            .filter(|connection| connection.is_open())
            .map(|connection| Lease {
                connection: Arc::clone(connection),
                generation: self.generation,
            })
    }

    /// An open connection other than the one `observed` refers to is installed.
    pub(crate) fn is_superseded(&self, observed: Option<u64>) -> bool {
        self.open_lease()
            .is_some_and(|lease| Some(lease.generation) != observed)
    }

    /// The outcome of an episode that gave up after `since` exhaustions were
    /// counted, if no connection has been installed since.
    pub(crate) fn exhausted_since(&self, since: u64) -> Option<ClientError> {
        self.exhausted
            .as_ref()
            .filter(|exhausted| exhausted.epoch > since)
            .map(|exhausted| ClientError::RecoveryExhausted {
                attempts: exhausted.attempts,
                last_error: exhausted.last_error.clone(),
            })
    }

    pub(crate) fn record_exhausted(
        &mut self,
        epoch: u64,
        attempts: u32,
        last_error: Option<TransportError>,
    ) {
        self.exhausted = Some(Exhausted {
            epoch,
            attempts,
            last_error,
        });
    }
}

/// A connection handed to an operation, tagged with its generation.
pub(crate) struct Lease<C> {
    pub(crate) connection: Arc<C>,
    pub(crate) generation: u64,
}

/// Why the manager could not hand out a connection.
#[derive(Debug)]
pub(crate) enum ConnectError {
    Terminated,
    Transport(TransportError),
    /// Recovery gave up and nothing has connected since.
    Exhausted(ClientError),
}

impl From<ConnectError> for ClientError {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Terminated => ClientError::Shutdown,
            ConnectError::Transport(error) => ClientError::Transport(error),
            ConnectError::Exhausted(error) => error,
        }
    }
}

pub(crate) struct ConnectionManager<K: Connector> {
    connector: K,
    settings: ConnectionSettings,
    slot: Mutex<Slot<K::Connection>>,
    registry: DurableRegistry<K::Connection>,
    terminated: watch::Sender<bool>,
    hook: ShutdownHook,
    state: ClientState,
    events: EventSink,
}

impl<K: Connector> ConnectionManager<K> {
    pub(crate) fn new(
        connector: K,
        settings: ConnectionSettings,
        hook: ShutdownHook,
        state: ClientState,
        events: EventSink,
    ) -> Self {
        let (terminated, _) = watch::channel(false);
        Self {
            connector,
            settings,
            slot: Mutex::new(Slot {
                connection: None,
                generation: 0,
                exhausted: None,
            }),
            registry: DurableRegistry::new(),
            terminated,
            hook,
            state,
            events,
        }
    }

    pub(crate) fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub(crate) fn registry(&self) -> &DurableRegistry<K::Connection> {
        &self.registry
    }

    pub(crate) fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Slot<K::Connection>> {
        self.slot.lock().await
    }

    /// Returns the open connection, opening one if there is none.
    ///
    /// Makes a single connect attempt; retrying is up to recovery.
    pub(crate) async fn get_or_create(&self) -> Result<Lease<K::Connection>, ConnectError> {
        self.acquire(None).await
    }

    /// Like [`get_or_create`](Self::get_or_create), but a caller that started
    /// when `since` exhaustions were counted gets any later exhaustion instead
    /// of a fresh connect attempt.
    pub(crate) async fn acquire(
        &self,
        since: Option<u64>,
    ) -> Result<Lease<K::Connection>, ConnectError> {
        let mut slot = self.lock().await;
        if self.is_terminated() {
            return Err(ConnectError::Terminated);
        }
        if let Some(lease) = slot.open_lease() {
            return Ok(lease);
        }
        if let Some(error) = since.and_then(|since| slot.exhausted_since(since)) {
            return Err(ConnectError::Exhausted(error));
        }
        self.discard(&mut slot).await;
        self.connect(&mut slot).await
    }

    /// The open connection, if any, without trying to open one.
    pub(crate) async fn current(&self) -> Option<Arc<K::Connection>> {
        self.lock()
            .await
            .open_lease()
            .map(|lease| lease.connection)
    }

    /// Opens a connection and installs it under a new generation.
    ///
    /// The slot must be empty or hold a dead connection.
    pub(crate) async fn connect(
        &self,
        slot: &mut Slot<K::Connection>,
    ) -> Result<Lease<K::Connection>, ConnectError> {
        if self.is_terminated() {
            return Err(ConnectError::Terminated);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            client = %self.events.client_name(),
            addresses = %self.settings.describe_addresses(),
            "Attempting to connect"
        );

        let connection = match self.connector.connect(&self.settings).await {
            Ok(connection) => Arc::new(connection),
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    client = %self.events.client_name(),
                    error = %error,
                    "Connect attempt failed"
                );
                self.events.emit(|client_name, timestamp| ClientEvent::ConnectFailed {
                    client_name,
                    timestamp,
                    error: error.clone(),
                });
                return Err(ConnectError::Transport(error));
            }
        };

        let generation = slot.generation + 1;
        self.watch(&connection, generation);
        slot.connection = Some(Arc::clone(&connection));
        slot.generation = generation;
        slot.exhausted = None;
        self.state.mark_connected(generation);

        #[cfg(feature = "tracing")]
        tracing::info!(
            client = %self.events.client_name(),
            generation,
            "Connected to broker"
        );
        #[cfg(feature = "metrics")]
        counter!("broker_connections_opened_total", "client" => self.events.client_name().to_string())
            .increment(1);
        self.events.emit(|client_name, timestamp| ClientEvent::Connected {
            client_name,
            timestamp,
            generation,
        });

        Ok(Lease {
            connection,
            generation,
        })
    }

    // Forwards remote shutdowns of this connection to the hook. Closes we
    // initiated ourselves are not failures.
    fn watch(&self, connection: &Arc<K::Connection>, generation: u64) {
        let listener = connection.shutdown_listener();
        let hook = Arc::clone(&self.hook);
        let state = self.state.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let Some(signal) = listener.wait().await else {
                return;
            };
            if signal.is_initiated_by_application() {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    client = %events.client_name(),
                    generation,
                    "Connection closed by application"
                );
                return;
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(
                client = %events.client_name(),
                generation,
                reason = %signal.reason(),
                "Connection shut down by broker"
            );
            if state.generation() == generation {
                state.mark_disconnected();
            }
            events.emit(|client_name, timestamp| ClientEvent::RemoteShutdown {
                client_name,
                timestamp,
                generation,
                reason: signal.reason().to_string(),
            });
            hook(generation, signal);
        });
    }

    /// Drops the installed connection, closing it if it is still open.
    /// Close failures are ignored.
    pub(crate) async fn discard(&self, slot: &mut Slot<K::Connection>) {
        let Some(stale) = slot.connection.take() else {
            return;
        };
        if stale.is_open() {
            if let Err(error) = stale.close().await {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    client = %self.events.client_name(),
                    error = %error,
                    "Ignoring failure while closing stale connection"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = error;
            }
        }
        if self.state.generation() == slot.generation {
            self.state.mark_disconnected();
        }
    }

    /// Sleeps for `delay`, waking early if the client is shut down.
    pub(crate) async fn pause(&self, delay: Duration) -> Result<(), ConnectError> {
        let mut terminated = self.terminated.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                let _ = terminated.wait_for(|terminated| *terminated).await;
            } => {}
        }
        if self.is_terminated() {
            return Err(ConnectError::Terminated);
        }
        Ok(())
    }

    /// Terminates the manager: closes the connection and empties the registry.
    ///
    /// Returns `false` if it was already terminated.
    pub(crate) async fn shutdown(&self) -> bool {
        if self.terminated.send_replace(true) {
            return false;
        }
        self.state.mark_terminated();
        self.registry.close();

        let mut slot = self.lock().await;
        if let Some(connection) = slot.connection.take() {
            if connection.is_open() {
                #[cfg(feature = "tracing")]
                tracing::info!(client = %self.events.client_name(), "Closing broker connection");
                if let Err(error) = connection.close().await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        client = %self.events.client_name(),
                        error = %error,
                        "Ignoring failure while closing connection"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = error;
                }
            }
        }
        true
    }
}
