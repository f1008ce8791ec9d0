//! Retry policy for recovery episodes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{ExponentialBackoff, FixedInterval, IntervalFunction};

/// Attempt cap of [`RetryPolicy::default`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before each reconnect attempt unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What to do before a given reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then try to reconnect.
    RetryAfter(Duration),
    /// Stop; the episode failed.
    GiveUp,
}

/// Decides whether and when a recovery episode makes its next attempt.
///
/// A policy is either **bounded** (a fixed number of attempts, after which
/// recovery fails with a fatal error) or **unbounded** (retries forever).
/// The delay is constant by default; any [`IntervalFunction`] can replace it.
///
/// # Examples
///
/// ```
/// use broker_resilience::{RetryDecision, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::bounded(2).with_delay(Duration::from_millis(50));
/// assert_eq!(policy.should_retry(1), RetryDecision::RetryAfter(Duration::from_millis(50)));
/// assert_eq!(policy.should_retry(2), RetryDecision::RetryAfter(Duration::from_millis(50)));
/// assert_eq!(policy.should_retry(3), RetryDecision::GiveUp);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    interval: Arc<dyn IntervalFunction>,
}

impl RetryPolicy {
    /// At most `max_attempts` reconnect attempts per episode, 5 seconds apart.
    ///
    /// A bound of zero gives up before the first attempt.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            interval: Arc::new(FixedInterval::new(DEFAULT_RETRY_DELAY)),
        }
    }

    /// Never gives up, 5 seconds between attempts.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            interval: Arc::new(FixedInterval::new(DEFAULT_RETRY_DELAY)),
        }
    }

    /// Replaces the delay with a constant `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_backoff(FixedInterval::new(delay))
    }

    /// Replaces the delay with exponential backoff from `initial` up to `max`.
    pub fn with_exponential_backoff(self, initial: Duration, max: Duration) -> Self {
        self.with_backoff(ExponentialBackoff::new(initial).max_interval(max))
    }

    /// Replaces the delay with a custom interval function.
    pub fn with_backoff<I>(mut self, interval: I) -> Self
    where
        I: IntervalFunction + 'static,
    {
        self.interval = Arc::new(interval);
        self
    }

    /// Decides what happens before `attempt` (1-indexed within an episode).
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        match self.max_attempts {
            Some(max) if attempt > max => RetryDecision::GiveUp,
            _ => RetryDecision::RetryAfter(self.interval.next_interval(attempt)),
        }
    }

    /// The attempt cap, or `None` when unbounded.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether exhausting the policy is possible.
    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_ATTEMPTS)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("first_delay", &self.interval.next_interval(1))
            .finish()
    }
}
