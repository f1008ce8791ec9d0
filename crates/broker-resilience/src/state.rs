//! Connection and recovery state tracking.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No open connection yet, or the last one was lost.
    Disconnected,
    /// An open connection is installed.
    Connected,
    /// A recovery episode is running.
    Reconnecting,
    /// The last recovery episode ran out of attempts.
    Failed,
    /// The client was shut down. Terminal.
    Terminated,
}

impl ConnectionState {
    fn encode(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Failed => 3,
            ConnectionState::Terminated => 4,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Reconnecting,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Terminated,
        }
    }
}

/// Shared view of a client's connection and recovery progress.
///
/// Cloning shares the underlying counters.
#[derive(Clone)]
pub struct ClientState {
    state: Arc<AtomicU8>,
    attempt: Arc<AtomicU32>,
    recoveries: Arc<AtomicU64>,
    exhaustions: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
}

impl ClientState {
    /// Starts out `Disconnected` with all counters at zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected.encode())),
            attempt: Arc::new(AtomicU32::new(0)),
            recoveries: Arc::new(AtomicU64::new(0)),
            exhaustions: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::decode(self.state.load(Ordering::Acquire))
    }

    /// Attempt number of the running recovery episode, `0` when idle.
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    /// Number of recovery episodes that ended with a new connection.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Acquire)
    }

    /// Number of recovery episodes that ran out of attempts.
    pub fn exhaustions(&self) -> u64 {
        self.exhaustions.load(Ordering::Acquire)
    }

    /// Generation of the most recently installed connection, `0` if none yet.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether the client was shut down.
    pub fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Terminated
    }

    // Every transition except `mark_terminated` is ignored once terminated.
    fn transition(&self, next: ConnectionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectionState::Terminated.encode()).then_some(next.encode())
            });
    }

    pub(crate) fn mark_connected(&self, generation: u64) {
        self.generation.store(generation, Ordering::Release);
        self.transition(ConnectionState::Connected);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.transition(ConnectionState::Disconnected);
    }

    pub(crate) fn begin_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Release);
        self.transition(ConnectionState::Reconnecting);
    }

    pub(crate) fn mark_recovered(&self) {
        self.attempt.store(0, Ordering::Release);
        self.recoveries.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the new exhaustion count, which identifies this failure.
    pub(crate) fn mark_failed(&self) -> u64 {
        self.attempt.store(0, Ordering::Release);
        self.transition(ConnectionState::Failed);
        self.exhaustions.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mark_terminated(&self) {
        self.attempt.store(0, Ordering::Release);
        self.state
            .store(ConnectionState::Terminated.encode(), Ordering::Release);
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientState")
            .field("state", &self.state())
            .field("attempt", &self.attempt())
            .field("recoveries", &self.recoveries())
            .field("exhaustions", &self.exhaustions())
            .field("generation", &self.generation())
            .finish()
    }
}
