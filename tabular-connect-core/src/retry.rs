//! Retry with exponential backoff for connection establishment.
//!
//! Used when opening connections and probing reachability. Never used inside
//! the read protocol itself, whose counters must reflect exactly one attempt
//! per operation.

use rand::Rng;
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base backoff duration in milliseconds.
    pub base_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Create a retry configuration.
    pub fn new(max_retries: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
            max_backoff_ms,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Create a strategy from the configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether another attempt should follow the given completed attempt
    /// count.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    /// Backoff before the given attempt (1-based), doubled per attempt,
    /// capped, with up to 25% random jitter added.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent);
        let capped = exponential.min(self.config.max_backoff_ms);
        let jitter = rand::rng().random_range(0..=capped / 4);
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_respects_limit() {
        let strategy = RetryStrategy::new(RetryConfig::new(2, 100, 1000));
        assert!(strategy.should_retry(0));
        assert!(strategy.should_retry(1));
        assert!(!strategy.should_retry(2));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let strategy = RetryStrategy::new(RetryConfig::new(5, 100, 1000));

        let first = strategy.calculate_backoff(1).as_millis() as u64;
        assert!((100..=125).contains(&first));

        let second = strategy.calculate_backoff(2).as_millis() as u64;
        assert!((200..=250).contains(&second));

        // far past the cap
        let late = strategy.calculate_backoff(10).as_millis() as u64;
        assert!((1000..=1250).contains(&late));
    }
}
