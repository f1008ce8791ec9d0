//! Core infrastructure for broker-resilience.
//!
//! This crate holds the pieces shared by the reconnection engine and anything
//! built on top of it:
//! - The failure taxonomy operations report ([`OperationError`], [`TransportError`])
//! - The event listener infrastructure used for observability

pub mod error;
pub mod events;

pub use error::{BoxError, OperationError, TransportError, TransportErrorKind};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
