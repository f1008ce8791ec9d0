use std::time::Duration;

use broker_resilience_core::{EventListeners, TransportError};

use crate::events::ClientEvent;
use crate::policy::RetryPolicy;

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Where recovery episodes triggered by failed operations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// On the caller's task. `run` returns only after recovery and the re-run.
    #[default]
    Blocking,
    /// On the client's single background worker. `run` returns
    /// [`RunOutcome::Recovering`](crate::RunOutcome::Recovering) immediately.
    Background,
}

/// Configuration for a [`ResilientClient`](crate::ResilientClient).
pub struct ClientConfig {
    pub(crate) name: String,
    pub(crate) policy: RetryPolicy,
    pub(crate) mode: RecoveryMode,
    pub(crate) event_listeners: EventListeners<ClientEvent>,
}

impl ClientConfig {
    /// Creates a new builder.
    ///
    /// Defaults: blocking recovery, 5 attempts, 5 seconds apart.
    pub fn builder() -> ClientConfigBuilder {
        #[cfg(feature = "metrics")]
        {
            METRICS_INIT.call_once(|| {
                describe_counter!(
                    "broker_connections_opened_total",
                    "Total number of broker connections opened"
                );
                describe_counter!(
                    "broker_reconnect_attempts_total",
                    "Total number of reconnect attempts made by recovery episodes"
                );
                describe_counter!(
                    "broker_recoveries_total",
                    "Total number of recovery episodes that installed a new connection"
                );
                describe_counter!(
                    "broker_recoveries_exhausted_total",
                    "Total number of recovery episodes that ran out of attempts"
                );
                describe_counter!(
                    "broker_operation_failures_total",
                    "Total number of operations that hit a transport failure"
                );
                describe_counter!(
                    "broker_replays_total",
                    "Total number of durable operation replays"
                );
                describe_gauge!(
                    "broker_durable_operations",
                    "Number of operations registered for replay"
                );
            });
        }
        ClientConfigBuilder::new()
    }

    /// Preset for long-running services: background recovery that never gives up.
    pub fn background() -> ClientConfigBuilder {
        Self::builder()
            .mode(RecoveryMode::Background)
            .policy(RetryPolicy::unbounded())
    }

    /// Instance name used in logs, events and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The recovery mode.
    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().build()
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("mode", &self.mode)
            .field("listeners", &self.event_listeners.len())
            .finish()
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientConfigBuilder {
    name: String,
    policy: RetryPolicy,
    mode: RecoveryMode,
    event_listeners: EventListeners<ClientEvent>,
}

impl ClientConfigBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            policy: RetryPolicy::default(),
            mode: RecoveryMode::default(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the instance name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the retry policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use broker_resilience::{ClientConfig, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::builder()
    ///     .policy(RetryPolicy::bounded(10).with_delay(Duration::from_secs(1)))
    ///     .build();
    /// assert_eq!(config.policy().max_attempts(), Some(10));
    /// ```
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets where operation-triggered recovery runs.
    pub fn mode(mut self, mode: RecoveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Registers a callback for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add_fn(f);
        self
    }

    /// Registers a callback for each installed connection, with its generation.
    pub fn on_connected<F>(self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::Connected { generation, .. } = event {
                f(*generation);
            }
        })
    }

    /// Registers a callback for unsolicited connection closes, with the reason.
    pub fn on_remote_shutdown<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::RemoteShutdown { reason, .. } = event {
                f(reason);
            }
        })
    }

    /// Registers a callback invoked before each reconnect attempt sleeps.
    ///
    /// # Examples
    ///
    /// ```
    /// use broker_resilience::ClientConfig;
    ///
    /// let config = ClientConfig::builder()
    ///     .on_reconnect_attempt(|attempt, delay| {
    ///         println!("reconnect attempt {} in {:?}", attempt, delay);
    ///     })
    ///     .build();
    /// ```
    pub fn on_reconnect_attempt<F>(self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::ReconnectAttempt { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        })
    }

    /// Registers a callback for successful recovery episodes, with the attempts used.
    pub fn on_recovered<F>(self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::Recovered { attempts, .. } = event {
                f(*attempts);
            }
        })
    }

    /// Registers a callback for recovery episodes that gave up.
    pub fn on_recovery_exhausted<F>(self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::RecoveryExhausted { attempts, .. } = event {
                f(*attempts);
            }
        })
    }

    /// Registers a callback for operations that hit a transport failure.
    pub fn on_operation_failed<F>(self, f: F) -> Self
    where
        F: Fn(&str, &TransportError) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::OperationFailed {
                operation_id,
                error,
                ..
            } = event
            {
                f(operation_id, error);
            }
        })
    }

    /// Registers a callback for durable replays, with the operation id and
    /// whether the replay succeeded.
    pub fn on_replay<F>(self, f: F) -> Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let ClientEvent::Replayed {
                operation_id,
                succeeded,
                ..
            } = event
            {
                f(operation_id, *succeeded);
            }
        })
    }

    /// Builds the configuration.
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            name: self.name,
            policy: self.policy,
            mode: self.mode,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
