//! Delay functions used between reconnect attempts.

use std::time::Duration;

/// Computes the delay before a reconnect attempt.
///
/// `attempt` is 1-indexed: the first attempt of an episode is `1`.
pub trait IntervalFunction: Send + Sync {
    /// Returns the delay to wait before `attempt`.
    fn next_interval(&self, attempt: u32) -> Duration;
}

impl<F> IntervalFunction for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn next_interval(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// The same delay before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval {
    delay: Duration,
}

impl FixedInterval {
    /// Creates a constant delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Returns the configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl IntervalFunction for FixedInterval {
    fn next_interval(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Delay that grows geometrically per attempt, capped at a maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl ExponentialBackoff {
    /// Starts at `initial`, doubling per attempt, capped at 60 seconds.
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
        }
    }

    /// Sets the growth factor. Values below 1.0 are treated as 1.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the cap.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }
}

impl IntervalFunction for ExponentialBackoff {
    fn next_interval(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_interval.as_nanos() as f64 {
            self.max_interval
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }
}
