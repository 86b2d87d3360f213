use std::time::Duration;

/// Retry budget and exponential backoff for failed scrapes.
///
/// Delay schedule with the defaults: 1s, 2s, 4s, ... capped at 60s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// True once `retries` attempts have been spent.
    pub fn exhausted(&self, retries: u32) -> bool {
        retries >= self.max_attempts
    }

    /// Backoff before the given retry (1-indexed): `base * 2^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}
