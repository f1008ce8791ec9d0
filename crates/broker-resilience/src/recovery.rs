//! Recovery episodes and the background recovery worker.
//!
//! A recovery episode holds the connection slot for its whole duration,
//! replay included, so concurrent triggers for the same outage queue up
//! behind it. When they get the slot, they find a connection newer than the
//! one they saw fail and skip. An episode that gives up is recorded in the
//! slot; triggers that started before it get its error instead of starting
//! another episode.
//!
//! Remote shutdown notifications never run recovery on the connection's own
//! watcher task; they are queued to a single worker task per client. In
//! background mode failed operations are queued to the same worker.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;

use broker_resilience_core::TransportError;

use crate::address::ConnectionSettings;
use crate::config::{ClientConfig, RecoveryMode};
use crate::connection::{BrokerConnection, Connector, ShutdownSignal};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventSink};
use crate::executor::{execute_on, execute_once, Failure};
use crate::manager::{ConnectError, ConnectionManager, Lease, ShutdownHook, Slot};
use crate::operation::{same_operation, OperationRef, RunOptions};
use crate::policy::{RetryDecision, RetryPolicy};
use crate::state::ClientState;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Work queued to the recovery worker.
pub(crate) enum Job<C> {
    /// The connection of `generation` was closed by the broker. `since` is
    /// the exhaustion count at the time.
    RemoteShutdown {
        generation: u64,
        since: u64,
        signal: ShutdownSignal,
    },
    /// An operation failed in background mode; recover, then run it again.
    Retry {
        operation: OperationRef<C>,
        options: RunOptions,
        observed: Option<u64>,
        since: u64,
    },
    Stop,
}

/// How an episode ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// A new connection was installed after `attempts` attempts.
    Reconnected { attempts: u32, generation: u64 },
    /// Someone else already replaced the failed connection.
    AlreadyCurrent,
}

pub(crate) struct RecoveryCoordinator<K: Connector> {
    manager: ConnectionManager<K>,
    policy: RetryPolicy,
    mode: RecoveryMode,
    state: ClientState,
    events: EventSink,
    jobs: mpsc::UnboundedSender<Job<K::Connection>>,
}

impl<K: Connector> RecoveryCoordinator<K> {
    /// Builds the coordinator and spawns its worker on the current runtime.
    pub(crate) fn start(
        connector: K,
        settings: ConnectionSettings,
        config: ClientConfig,
    ) -> Arc<Self> {
        let (jobs, queue) = mpsc::unbounded_channel();
        let state = ClientState::new();
        let events = EventSink::new(&config.name, config.event_listeners);

        let hook_jobs = jobs.clone();
        let hook_state = state.clone();
        let hook: ShutdownHook = Arc::new(move |generation, signal| {
            // Fails only once the worker is gone, i.e. after shutdown.
            let _ = hook_jobs.send(Job::RemoteShutdown {
                generation,
                since: hook_state.exhaustions(),
                signal,
            });
        });

        let coordinator = Arc::new(Self {
            manager: ConnectionManager::new(
                connector,
                settings,
                hook,
                state.clone(),
                events.clone(),
            ),
            policy: config.policy,
            mode: config.mode,
            state,
            events,
            jobs,
        });
        tokio::spawn(worker(Arc::downgrade(&coordinator), queue));
        coordinator
    }

    pub(crate) fn manager(&self) -> &ConnectionManager<K> {
        &self.manager
    }

    pub(crate) fn mode(&self) -> RecoveryMode {
        self.mode
    }

    pub(crate) fn state(&self) -> &ClientState {
        &self.state
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    /// Queues `job` to the worker.
    pub(crate) fn dispatch(&self, job: Job<K::Connection>) -> Result<(), ClientError> {
        self.jobs.send(job).map_err(|_| ClientError::Shutdown)
    }

    /// Runs a recovery episode and, if it installed a new connection, replays
    /// every durable operation except `trigger` before releasing the slot.
    ///
    /// `observed` is the generation the caller saw fail, `None` if it never
    /// got a connection. `since` is the exhaustion count the caller started
    /// under.
    pub(crate) async fn recover(
        &self,
        observed: Option<u64>,
        since: u64,
        trigger: Option<&OperationRef<K::Connection>>,
    ) -> Result<Recovery, ClientError> {
        let mut slot = self.manager.lock().await;
        let recovery = self.reconnect(&mut slot, observed, since).await?;
        if let Recovery::Reconnected { .. } = recovery {
            // The connection may already be gone again; its watcher has
            // queued the next episode.
            if let Some(lease) = slot.open_lease() {
                self.replay(&lease, trigger).await;
            }
        }
        Ok(recovery)
    }

    async fn reconnect(
        &self,
        slot: &mut Slot<K::Connection>,
        observed: Option<u64>,
        since: u64,
    ) -> Result<Recovery, ClientError> {
        if self.manager.is_terminated() {
            return Err(ClientError::Shutdown);
        }
        if slot.is_superseded(observed) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                client = %self.events.client_name(),
                observed = ?observed,
                "Connection already replaced, skipping recovery"
            );
            return Ok(Recovery::AlreadyCurrent);
        }
        if let Some(error) = slot.exhausted_since(since) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                client = %self.events.client_name(),
                "Recovery already gave up on this outage"
            );
            return Err(error);
        }

        let mut attempt = 1;
        let mut last_error: Option<TransportError> = None;
        loop {
            let delay = match self.policy.should_retry(attempt) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::GiveUp => {
                    let attempts = attempt - 1;
                    let epoch = self.state.mark_failed();
                    slot.record_exhausted(epoch, attempts, last_error.clone());
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        client = %self.events.client_name(),
                        attempts,
                        "Can't recover broker connection, giving up"
                    );
                    #[cfg(feature = "metrics")]
                    counter!("broker_recoveries_exhausted_total", "client" => self.events.client_name().to_string())
                        .increment(1);
                    self.events
                        .emit(|client_name, timestamp| ClientEvent::RecoveryExhausted {
                            client_name,
                            timestamp,
                            attempts,
                        });
                    return Err(ClientError::RecoveryExhausted {
                        attempts,
                        last_error,
                    });
                }
            };

            self.state.begin_attempt(attempt);
            self.manager.discard(slot).await;

            #[cfg(feature = "tracing")]
            tracing::warn!(
                client = %self.events.client_name(),
                attempt,
                delay = ?delay,
                "Delaying attempt to recover broker connection"
            );
            #[cfg(feature = "metrics")]
            counter!("broker_reconnect_attempts_total", "client" => self.events.client_name().to_string())
                .increment(1);
            self.events
                .emit(|client_name, timestamp| ClientEvent::ReconnectAttempt {
                    client_name,
                    timestamp,
                    attempt,
                    delay,
                });

            self.manager.pause(delay).await?;

            match self.manager.connect(slot).await {
                Ok(lease) => {
                    self.state.mark_recovered();
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        client = %self.events.client_name(),
                        attempts = attempt,
                        generation = lease.generation,
                        "Broker connection recovered"
                    );
                    #[cfg(feature = "metrics")]
                    counter!("broker_recoveries_total", "client" => self.events.client_name().to_string())
                        .increment(1);
                    let generation = lease.generation;
                    self.events.emit(|client_name, timestamp| ClientEvent::Recovered {
                        client_name,
                        timestamp,
                        attempts: attempt,
                        generation,
                    });
                    return Ok(Recovery::Reconnected {
                        attempts: attempt,
                        generation,
                    });
                }
                Err(ConnectError::Transport(error)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        client = %self.events.client_name(),
                        attempt,
                        error = %error,
                        "Recovery attempt failed"
                    );
                    last_error = Some(error);
                    attempt = attempt.saturating_add(1);
                }
                Err(ConnectError::Terminated) => return Err(ClientError::Shutdown),
                Err(ConnectError::Exhausted(error)) => return Err(error),
            }
        }
    }

    // Best effort: a failed replay is reported and left for the next episode.
    async fn replay(
        &self,
        lease: &Lease<K::Connection>,
        trigger: Option<&OperationRef<K::Connection>>,
    ) {
        for operation in self.manager.registry().snapshot() {
            if trigger.is_some_and(|trigger| same_operation(trigger, &operation)) {
                continue;
            }
            if self.manager.is_terminated() || !lease.connection.is_open() {
                return;
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(
                client = %self.events.client_name(),
                operation = %operation.operation_id(),
                generation = lease.generation,
                "Recovering durable operation"
            );
            let succeeded = match execute_on(self.manager.registry(), &operation, lease).await {
                Ok(()) => true,
                Err(failure) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        client = %self.events.client_name(),
                        operation = %operation.operation_id(),
                        failure = %failure,
                        "Replay of durable operation failed"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = failure;
                    false
                }
            };

            #[cfg(feature = "metrics")]
            counter!(
                "broker_replays_total",
                "client" => self.events.client_name().to_string(),
                "result" => if succeeded { "success" } else { "failure" }
            )
            .increment(1);
            self.events.emit(|client_name, timestamp| ClientEvent::Replayed {
                client_name,
                timestamp,
                operation_id: operation.operation_id().to_string(),
                succeeded,
            });
        }
    }

    async fn handle(&self, job: Job<K::Connection>) {
        match job {
            Job::RemoteShutdown {
                generation,
                since,
                signal,
            } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    client = %self.events.client_name(),
                    generation,
                    reason = %signal.reason(),
                    "Trying to recover connection and durable operations"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = signal;
                if let Err(error) = self.recover(Some(generation), since, None).await {
                    self.log_unrecovered(&error);
                }
            }
            Job::Retry {
                operation,
                options,
                observed,
                since,
            } => self.retry(operation, options, observed, since).await,
            Job::Stop => {}
        }
    }

    // Recovers for a failed background-mode operation, then runs it once more.
    // A fresh transport failure queues another retry.
    async fn retry(
        &self,
        operation: OperationRef<K::Connection>,
        options: RunOptions,
        observed: Option<u64>,
        since: u64,
    ) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            client = %self.events.client_name(),
            operation = %operation.operation_id(),
            "Trying to recover connection for operation"
        );
        if let Err(error) = self.recover(observed, since, Some(&operation)).await {
            self.log_unrecovered(&error);
            return;
        }

        match execute_once(&self.manager, &operation, since, true).await {
            Ok(()) => {}
            Err(Failure::Shutdown) => {}
            Err(Failure::Exhausted(error)) => self.log_unrecovered(&error),
            Err(Failure::Application(error)) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    client = %self.events.client_name(),
                    operation = %operation.operation_id(),
                    error = %error,
                    "Operation failed after recovery"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = error;
            }
            Err(Failure::Transport { observed, error }) => {
                self.report_failure(&operation, &error, options.fail_fast);
                let _ = self.dispatch(Job::Retry {
                    operation,
                    options,
                    observed,
                    since,
                });
            }
        }
    }

    /// Logs, counts and emits an operation's transport failure.
    pub(crate) fn report_failure(
        &self,
        operation: &OperationRef<K::Connection>,
        error: &TransportError,
        fail_fast: bool,
    ) {
        #[cfg(feature = "tracing")]
        tracing::error!(
            client = %self.events.client_name(),
            operation = %operation.operation_id(),
            error = %error,
            fail_fast,
            "Failed to run operation"
        );
        #[cfg(feature = "metrics")]
        counter!("broker_operation_failures_total", "client" => self.events.client_name().to_string())
            .increment(1);
        self.events
            .emit(|client_name, timestamp| ClientEvent::OperationFailed {
                client_name,
                timestamp,
                operation_id: operation.operation_id().to_string(),
                error: error.clone(),
                fail_fast,
            });
    }

    fn log_unrecovered(&self, error: &ClientError) {
        match error {
            ClientError::Shutdown => {
                #[cfg(feature = "tracing")]
                tracing::debug!(client = %self.events.client_name(), "Recovery stopped by shutdown");
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    client = %self.events.client_name(),
                    error = %error,
                    "Broker connection is not recovered"
                );
            }
        }
    }
}

// Holds only a weak reference so dropping the last client handle stops it.
async fn worker<K: Connector>(
    coordinator: Weak<RecoveryCoordinator<K>>,
    mut queue: mpsc::UnboundedReceiver<Job<K::Connection>>,
) {
    while let Some(job) = queue.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        if matches!(job, Job::Stop) || coordinator.manager.is_terminated() {
            break;
        }
        coordinator.handle(job).await;
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Recovery worker stopped");
}
