//! Reconnection Policy
//!
//! Exponential backoff with jitter for the ticker WebSocket.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::TickerSettings;

/// Jitter applied to every delay, as a fraction of it.
const JITTER_FACTOR: f64 = 0.1;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&TickerSettings::default())
    }
}

impl From<&TickerSettings> for ReconnectConfig {
    fn from(settings: &TickerSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: JITTER_FACTOR,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Stateful backoff. `reset` after every successful connection.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use kite_gateway::infrastructure::kite::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(1),
///     multiplier: 2.0,
///     jitter_factor: 0.0,
///     max_attempts: 2,
/// });
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(policy.next_delay(), None);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts run out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        let base = self.base_delay(self.attempt);
        self.attempt += 1;
        Some(self.jitter(base))
    }

    /// Forget past failures.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt < self.config.max_attempts
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let max = self.config.max_delay.as_secs_f64();
        let secs = self.config.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() && secs < max {
            Duration::from_secs_f64(secs)
        } else {
            self.config.max_delay
        }
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.001))
    }
}
