//! The public entry point.

use std::fmt;
use std::sync::Arc;

use crate::address::ConnectionSettings;
use crate::config::ClientConfig;
use crate::connection::Connector;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::executor::OperationExecutor;
use crate::operation::{OperationRef, RunOptions, RunOutcome};
use crate::recovery::{Job, RecoveryCoordinator};
use crate::state::ClientState;

/// A broker connection that recovers itself.
///
/// One client owns at most one connection at a time. Operations share it;
/// when it fails, the client reconnects according to its
/// [`RetryPolicy`](crate::RetryPolicy) and replays every durable operation on
/// the new connection.
///
/// Cloning is cheap and yields a handle to the same client.
pub struct ResilientClient<K: Connector> {
    executor: Arc<OperationExecutor<K>>,
}

impl<K: Connector> ResilientClient<K> {
    /// Creates a client. No connection is opened until the first operation
    /// runs or [`connection`](Self::connection) is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; the client spawns its
    /// recovery worker on the current runtime.
    pub fn new(connector: K, settings: ConnectionSettings, config: ClientConfig) -> Self {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            client = %config.name,
            addresses = %settings.describe_addresses(),
            mode = ?config.mode,
            policy = ?config.policy,
            "Creating resilient client"
        );
        let coordinator = RecoveryCoordinator::start(connector, settings, config);
        Self {
            executor: Arc::new(OperationExecutor::new(coordinator)),
        }
    }

    /// Runs an operation. Transport failures trigger recovery and a re-run.
    pub async fn run(
        &self,
        operation: OperationRef<K::Connection>,
    ) -> Result<RunOutcome, ClientError> {
        self.run_with(operation, RunOptions::new()).await
    }

    /// Runs an operation and registers it for replay after every recovery.
    pub async fn run_durable(
        &self,
        operation: OperationRef<K::Connection>,
    ) -> Result<RunOutcome, ClientError> {
        self.run_with(operation, RunOptions::new().durable(true))
            .await
    }

    /// Runs an operation with explicit options.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Shutdown`] once the client is shut down.
    /// - [`ClientError::Application`] when the operation fails for its own reasons.
    /// - [`ClientError::RecoveryExhausted`] when a blocking-mode recovery gives up.
    pub async fn run_with(
        &self,
        operation: OperationRef<K::Connection>,
        options: RunOptions,
    ) -> Result<RunOutcome, ClientError> {
        self.executor.run(operation, options).await
    }

    /// Stops replaying `operation`. Returns `false` if it was not durable.
    pub fn deregister(&self, operation: &OperationRef<K::Connection>) -> bool {
        self.executor.deregister(operation)
    }

    /// Whether `operation` is registered for replay.
    pub fn is_durable(&self, operation: &OperationRef<K::Connection>) -> bool {
        self.coordinator().manager().registry().contains(operation)
    }

    /// Number of operations registered for replay.
    pub fn durable_count(&self) -> usize {
        self.coordinator().manager().registry().len()
    }

    /// Returns the open connection, making a single attempt to open one if
    /// there is none. Does not start recovery.
    pub async fn connection(&self) -> Result<Arc<K::Connection>, ClientError> {
        let lease = self.coordinator().manager().get_or_create().await?;
        Ok(lease.connection)
    }

    /// Whether an open connection is installed.
    pub async fn is_connected(&self) -> bool {
        self.coordinator().manager().current().await.is_some()
    }

    /// Shuts the client down for good.
    ///
    /// Closes the connection, forgets every durable operation and wakes any
    /// recovery episode sleeping between attempts. Later calls return
    /// `false`.
    pub async fn shutdown(&self) -> bool {
        let coordinator = self.coordinator();
        if !coordinator.manager().shutdown().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(client = %self.name(), "Client already shut down");
            return false;
        }
        // The worker may already be gone.
        let _ = coordinator.dispatch(Job::Stop);
        self.executor.record_durable_count();

        #[cfg(feature = "tracing")]
        tracing::info!(client = %self.name(), "Client shut down");
        coordinator
            .events()
            .emit(|client_name, timestamp| ClientEvent::Shutdown {
                client_name,
                timestamp,
            });
        true
    }

    /// Live view of the connection and recovery state.
    pub fn state(&self) -> &ClientState {
        self.coordinator().state()
    }

    /// The settings connections are opened with.
    pub fn settings(&self) -> &ConnectionSettings {
        self.coordinator().manager().settings()
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        self.coordinator().events().client_name()
    }

    fn coordinator(&self) -> &RecoveryCoordinator<K> {
        self.executor.coordinator()
    }
}

impl<K: Connector> Clone for ResilientClient<K> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<K: Connector> fmt::Debug for ResilientClient<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("name", &self.name())
            .field("state", self.state())
            .field("durable", &self.durable_count())
            .finish()
    }
}
