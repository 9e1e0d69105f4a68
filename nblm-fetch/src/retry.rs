//! Retry strategy for transient transport failures.

use std::time::Duration;

use crate::error::TransportError;

/// Strategy for retrying transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Whether to use exponential backoff.
    pub exponential_backoff: bool,
    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,
}

impl RetryStrategy {
    /// Creates a strategy with exponential backoff from 500ms.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 500,
            exponential_backoff: true,
            max_delay_ms: 30_000,
        }
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            exponential_backoff: false,
            max_delay_ms: 0,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables or disables exponential backoff.
    #[must_use]
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Delay before the attempt after `attempt` (1-based) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = if self.exponential_backoff {
            let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
            self.base_delay_ms.saturating_mul(factor)
        } else {
            self.base_delay_ms
        };

        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Returns true if another attempt is allowed after `attempt` failed.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Determines if a transport error should be retried.
    ///
    /// Connect failures were never sent and are always safe. Timeouts and
    /// body errors may have reached the server, so they are retried only
    /// for idempotent calls.
    pub fn should_retry(&self, error: &TransportError, idempotent: bool) -> bool {
        if error.definitely_not_sent() {
            return error.is_retryable();
        }
        idempotent && error.is_retryable()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(3)
    }
}
