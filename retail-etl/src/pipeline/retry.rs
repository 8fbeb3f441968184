//! Whole-run retry policy.
//!
//! A failed run is restarted from the first stage after a delay. There is
//! no partial resume; stages are idempotent.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// delay = base
    #[default]
    Constant,
    /// delay = base * retry number
    Linear,
    /// delay = base * 2^(retry number - 1)
    Exponential,
}

/// Retry settings (`[retry]` config section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first run.
    pub max_attempts: u32,
    /// Base delay before a retry, in seconds.
    pub delay_secs: u64,
    /// Upper bound on any delay, in seconds.
    pub max_delay_secs: u64,
    /// Delay growth.
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_secs: 300,
            max_delay_secs: 3600,
            backoff: BackoffStrategy::Constant,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_secs = delay.as_secs();
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.delay_secs;
        let retry = retry.max(1);
        let secs = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(retry - 1))
            }
        };
        Duration::from_secs(secs.min(self.max_delay_secs))
    }

    /// Checks the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.max_delay_secs < self.delay_secs {
            return Err(ConfigError::invalid(
                "retry.max_delay_secs",
                "must not be smaller than retry.delay_secs",
            ));
        }
        Ok(())
    }
}

/// Attempts made so far.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryState {
    /// Completed attempts.
    pub attempts: u32,
}

impl RetryState {
    /// Creates a state with no attempts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Returns true if no attempts remain.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempts >= config.max_attempts
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run again after the delay.
    Retry(Duration),
    /// Stop and report the failure.
    GiveUp,
}

/// Decides whether a failed attempt is retried.
#[must_use]
pub fn should_retry(state: &RetryState, config: &RetryConfig) -> RetryDecision {
    if state.is_exhausted(config) {
        RetryDecision::GiveUp
    } else {
        RetryDecision::Retry(config.delay_for(state.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_one_retry_after_five_minutes() {
        let config = RetryConfig::default();
        let mut state = RetryState::new();

        state.record_attempt();
        assert_eq!(
            should_retry(&state, &config),
            RetryDecision::Retry(Duration::from_secs(300))
        );

        state.record_attempt();
        assert_eq!(should_retry(&state, &config), RetryDecision::GiveUp);
    }

    #[test]
    fn test_no_retry() {
        let mut state = RetryState::new();
        state.record_attempt();
        assert_eq!(
            should_retry(&state, &RetryConfig::no_retry()),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_backoff_delays() {
        let config = RetryConfig::default()
            .with_delay(Duration::from_secs(60))
            .with_backoff(BackoffStrategy::Exponential);
        assert_eq!(config.delay_for(1), Duration::from_secs(60));
        assert_eq!(config.delay_for(3), Duration::from_secs(240));
        assert_eq!(config.delay_for(10), Duration::from_secs(3600));

        let linear = config.with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(2), Duration::from_secs(120));
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_section() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 4, "backoff": "linear"}"#).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.delay_secs, 300);
        assert_eq!(config.backoff, BackoffStrategy::Linear);
    }
}
