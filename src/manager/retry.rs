//! Retry policy applied by the manager between backend attempts.

use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Backoff {
    /// Wait the base delay before every retry.
    Fixed,
    /// Double the base delay after every failed attempt.
    #[default]
    Exponential,
}

/// Attempt budget and pacing of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    ///
    /// ```rust
    /// use fetchkeep::manager::{Backoff, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 5,
    ///     delay: Duration::from_millis(100),
    ///     backoff: Backoff::Exponential,
    /// };
    /// assert_eq!(policy.delay(1), Duration::from_millis(100));
    /// assert_eq!(policy.delay(3), Duration::from_millis(400));
    /// ```
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        }
    }
}
