//! Retry delay policies.

use std::time::Duration;

/// Decides how long to wait before retry number `attempt` (1-based).
pub trait BackoffPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Same delay before every retry.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential backoff with a cap and optional ±25% jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Spread delays by ±25% to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..Self::default()
        }
    }

    fn base_delay(&self, attempt: u32) -> f64 {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        secs.min(self.max_delay.as_secs_f64())
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        if !self.jitter {
            return Duration::from_secs_f64(capped);
        }
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }
}
