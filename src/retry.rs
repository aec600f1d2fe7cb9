use std::time::Duration;

/// Bounded retry schedule for registry requests.
///
/// # Configuration
///
/// - **Attempts**: one initial try plus at most `max_retries` retries.
/// - **Rate limits (429)**: exponential backoff, `base * 2^attempt`.
/// - **Server errors / timeouts**: flat `base` delay between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

/// Why a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    Transient,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before the retry that follows the zero-based `attempt`,
    /// or `None` once the cap is reached.
    pub fn delay_for(&self, attempt: u32, reason: RetryReason) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay = match reason {
            RetryReason::RateLimited => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
            RetryReason::Transient => self.base_delay,
        };
        Some(delay)
    }

    /// Total number of requests a single call may issue.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(2))
    }
}
