//! Integration tests for the resilient client.
//!
//! Test organization:
//! - connection.rs: address failover, lazy connect, settings validation
//! - recovery.rs: bounded and unbounded recovery, remote shutdowns, fail-fast
//! - durable.rs: durable registration and replay
//! - background.rs: background recovery mode
//! - shutdown.rs: terminal shutdown
//! - concurrency.rs: concurrent callers sharing one connection

mod concurrency;
mod connection;
mod recovery;
mod shutdown;
