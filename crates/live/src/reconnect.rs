//! Exponential-backoff reconnection policy for job event streams.
//!
//! After an unexpected close the connection manager asks the policy
//! for the delay belonging to the current attempt number. Once the
//! attempt number passes [`ReconnectPolicy::max_attempts`] the policy
//! returns `None` and the manager gives up.

use std::time::Duration;

use datacure_core::config::ClientConfig;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Number of consecutive attempts allowed before exhaustion.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
            max_attempts: config.reconnect_max_attempts,
            ..Default::default()
        }
    }

    /// Delay to wait before reconnect attempt number `attempt` (1-based).
    ///
    /// Computed as `base_delay * multiplier^(attempt - 1)`, clamped to
    /// [`max_delay`](Self::max_delay). Returns `None` when `attempt` is
    /// zero or exceeds [`max_attempts`](Self::max_attempts).
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.powi(attempt as i32 - 1);
        let delay_ms = self.base_delay.as_millis() as f64 * factor;
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped_ms as u64))
    }

    /// Sum of every delay the policy will ever wait.
    pub fn total_budget(&self) -> Duration {
        (1..=self.max_attempts).filter_map(|a| self.delay_for(a)).sum()
    }
}
