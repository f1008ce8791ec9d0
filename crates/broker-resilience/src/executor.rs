//! Runs operations against the shared connection and routes their failures.

use std::fmt;
use std::sync::Arc;

use broker_resilience_core::{BoxError, OperationError, TransportError};

use crate::config::RecoveryMode;
use crate::connection::Connector;
use crate::error::ClientError;
use crate::manager::{ConnectError, ConnectionManager, Lease};
use crate::registry::DurableRegistry;
use crate::operation::{OperationRef, RunOptions, RunOutcome};
use crate::recovery::{Job, RecoveryCoordinator};

#[cfg(feature = "metrics")]
use metrics::gauge;

/// Why a single execution did not succeed.
pub(crate) enum Failure {
    Shutdown,
    /// `observed` is the generation of the connection the operation ran on,
    /// `None` if opening a connection failed.
    Transport {
        observed: Option<u64>,
        error: TransportError,
    },
    /// Recovery already gave up on this outage.
    Exhausted(ClientError),
    Application(BoxError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Shutdown => f.write_str("client has been shut down"),
            Failure::Transport { error, .. } => write!(f, "transport failure: {error}"),
            Failure::Exhausted(error) => write!(f, "{error}"),
            Failure::Application(error) => write!(f, "application failure: {error}"),
        }
    }
}

/// Executes `operation` once on the current connection, opening one if needed.
///
/// `since` is the exhaustion count the caller started under. With `rerun`
/// set, a durable operation that recovery already replayed on the current
/// connection is not run again.
pub(crate) async fn execute_once<K: Connector>(
    manager: &ConnectionManager<K>,
    operation: &OperationRef<K::Connection>,
    since: u64,
    rerun: bool,
) -> Result<(), Failure> {
    let lease = match manager.acquire(Some(since)).await {
        Ok(lease) => lease,
        Err(ConnectError::Terminated) => return Err(Failure::Shutdown),
        Err(ConnectError::Exhausted(error)) => return Err(Failure::Exhausted(error)),
        Err(ConnectError::Transport(error)) => {
            return Err(Failure::Transport {
                observed: None,
                error,
            })
        }
    };

    if rerun && manager.registry().ran_on(operation, lease.generation) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            operation = %operation.operation_id(),
            generation = lease.generation,
            "Operation already replayed on this connection"
        );
        return Ok(());
    }
    execute_on(manager.registry(), operation, &lease).await
}

/// Executes `operation` on `lease`, noting a completed durable run.
pub(crate) async fn execute_on<C: 'static>(
    registry: &DurableRegistry<C>,
    operation: &OperationRef<C>,
    lease: &Lease<C>,
) -> Result<(), Failure> {
    match operation.execute(Arc::clone(&lease.connection)).await {
        Ok(()) => {
            registry.record_run(operation, lease.generation);
            Ok(())
        }
        Err(OperationError::Transport(error)) => Err(Failure::Transport {
            observed: Some(lease.generation),
            error,
        }),
        Err(OperationError::Application(error)) => Err(Failure::Application(error)),
    }
}

pub(crate) struct OperationExecutor<K: Connector> {
    coordinator: Arc<RecoveryCoordinator<K>>,
}

impl<K: Connector> OperationExecutor<K> {
    pub(crate) fn new(coordinator: Arc<RecoveryCoordinator<K>>) -> Self {
        Self { coordinator }
    }

    pub(crate) fn coordinator(&self) -> &RecoveryCoordinator<K> {
        &self.coordinator
    }

    /// Runs `operation` until it completes or its failure is handed off.
    ///
    /// Durable operations are registered before the first execution and stay
    /// registered whatever the outcome.
    pub(crate) async fn run(
        &self,
        operation: OperationRef<K::Connection>,
        options: RunOptions,
    ) -> Result<RunOutcome, ClientError> {
        let manager = self.coordinator.manager();
        if manager.is_terminated() {
            return Err(ClientError::Shutdown);
        }
        if options.durable {
            self.register(&operation);
        }

        let since = self.coordinator.state().exhaustions();
        let mut rerun = false;
        loop {
            let (observed, error) = match execute_once(manager, &operation, since, rerun).await {
                Ok(()) => return Ok(RunOutcome::Completed),
                Err(Failure::Shutdown) => return Err(ClientError::Shutdown),
                Err(Failure::Exhausted(error)) => return Err(error),
                Err(Failure::Application(source)) => {
                    return Err(ClientError::Application {
                        operation_id: operation.operation_id().to_string(),
                        source,
                    })
                }
                Err(Failure::Transport { observed, error }) => (observed, error),
            };

            self.coordinator
                .report_failure(&operation, &error, options.fail_fast);
            if options.fail_fast {
                return Ok(RunOutcome::Abandoned);
            }

            match self.coordinator.mode() {
                RecoveryMode::Blocking => {
                    self.coordinator
                        .recover(observed, since, Some(&operation))
                        .await?;
                    rerun = true;
                }
                RecoveryMode::Background => {
                    self.coordinator.dispatch(Job::Retry {
                        operation,
                        options,
                        observed,
                        since,
                    })?;
                    return Ok(RunOutcome::Recovering);
                }
            }
        }
    }

    fn register(&self, operation: &OperationRef<K::Connection>) {
        let registry = self.coordinator.manager().registry();
        if registry.register(operation) {
            #[cfg(feature = "tracing")]
            tracing::info!(
                client = %self.coordinator.events().client_name(),
                operation = %operation.operation_id(),
                "Flagging operation as durable, it will be replayed after every recovery"
            );
            self.record_durable_count();
        }
    }

    /// Removes `operation` from the durable registry.
    pub(crate) fn deregister(&self, operation: &OperationRef<K::Connection>) -> bool {
        let removed = self.coordinator.manager().registry().deregister(operation);
        if removed {
            #[cfg(feature = "tracing")]
            tracing::info!(
                client = %self.coordinator.events().client_name(),
                operation = %operation.operation_id(),
                "Operation is no longer durable"
            );
            self.record_durable_count();
        }
        removed
    }

    pub(crate) fn record_durable_count(&self) {
        #[cfg(feature = "metrics")]
        gauge!("broker_durable_operations", "client" => self.coordinator.events().client_name().to_string())
            .set(self.coordinator.manager().registry().len() as f64);
    }
}
