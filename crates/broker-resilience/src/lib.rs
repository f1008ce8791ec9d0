//! Automatic connection recovery for message-broker clients.
//!
//! A [`ResilientClient`] owns one broker connection and runs operations
//! (publishers, consumer registrations, topology declarations) against it.
//! When the connection fails, either because an operation hit a transport
//! error or because the broker closed it, the client reconnects according to
//! a [`RetryPolicy`] and then replays every operation that was registered as
//! durable, so consumers come back without application code noticing.
//!
//! The broker protocol itself is plugged in through the [`Connector`] and
//! [`BrokerConnection`] traits.
//!
//! # Basic Example
//!
//! ```rust
//! use broker_resilience::{
//!     operation_fn, Address, ClientConfig, ConnectionSettings, OperationRef, ResilientClient,
//!     RetryPolicy,
//! };
//! # use broker_resilience::{shutdown_channel, BrokerConnection, Connector, ShutdownListener};
//! # use broker_resilience::TransportError;
//! # use futures::future::BoxFuture;
//! # struct Channel;
//! # impl BrokerConnection for Channel {
//! #     fn is_open(&self) -> bool { true }
//! #     fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> { Box::pin(async { Ok(()) }) }
//! #     fn shutdown_listener(&self) -> ShutdownListener { shutdown_channel().1 }
//! # }
//! # struct AmqpConnector;
//! # impl Connector for AmqpConnector {
//! #     type Connection = Channel;
//! #     fn connect<'a>(&'a self, _: &'a ConnectionSettings) -> BoxFuture<'a, Result<Channel, TransportError>> {
//! #         Box::pin(async { Ok(Channel) })
//! #     }
//! # }
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ConnectionSettings::builder()
//!     .address("rabbit-1:5672".parse::<Address>()?)
//!     .address("rabbit-2".parse::<Address>()?)
//!     .virtual_host("/orders")
//!     .build()?;
//!
//! let config = ClientConfig::builder()
//!     .name("order-service")
//!     .policy(RetryPolicy::bounded(10).with_delay(Duration::from_secs(2)))
//!     .on_recovered(|attempts| println!("recovered after {} attempts", attempts))
//!     .build();
//!
//! let client = ResilientClient::new(AmqpConnector, settings, config);
//!
//! // Re-registered on every new connection.
//! let consumer: OperationRef<Channel> = operation_fn("CONSUMER-orders", |_channel: Arc<Channel>| async {
//!     Ok(())
//! });
//! client.run_durable(consumer).await?;
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Recovery Modes
//!
//! In [`RecoveryMode::Blocking`] (the default), a caller whose operation hits
//! a transport failure runs the recovery episode itself and gets the re-run's
//! result. In [`RecoveryMode::Background`] the call returns
//! [`RunOutcome::Recovering`] at once and the client's worker task recovers
//! and re-runs the operation. Remote shutdowns are always handled by the
//! worker.
//!
//! # Feature Flags
//!
//! - `tracing` (default): structured logs for connects, failures and recovery.
//! - `metrics`: counters for connections, reconnect attempts, recoveries and
//!   replays, plus a gauge of durable operations.

pub mod address;
pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
mod executor;
mod manager;
pub mod operation;
pub mod policy;
mod recovery;
mod registry;
pub mod state;


pub use address::{Address, ConnectionSettings, ConnectionSettingsBuilder, Credentials, DEFAULT_PORT};
pub use backoff::{ExponentialBackoff, FixedInterval, IntervalFunction};
pub use client::ResilientClient;
pub use config::{ClientConfig, ClientConfigBuilder, RecoveryMode};
pub use connection::{
    shutdown_channel, BrokerConnection, Connector, ShutdownInitiator, ShutdownListener,
    ShutdownNotifier, ShutdownSignal,
};
pub use error::{ClientError, ConfigError};
pub use events::ClientEvent;
pub use operation::{operation_fn, FnOperation, Operation, OperationRef, RunOptions, RunOutcome};
pub use policy::{RetryDecision, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use state::{ClientState, ConnectionState};

pub use broker_resilience_core::{
    BoxError, EventListener, EventListeners, FnListener, OperationError, ResilienceEvent,
    TransportError, TransportErrorKind,
};
