//! Exponential backoff policy
//!
//! Shared by the request executor and the upsert writer. The policy itself
//! never sleeps; it only answers how long the caller should wait before the
//! next attempt, or that it should give up. Delays come from a
//! `backon::ExponentialBackoff` built from the retry settings.

use crate::config::RetryConfig;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// What to do after a counted failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Exponential backoff with an attempt ceiling
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,

    /// Upper bound on any single delay before jitter
    pub max_delay: Duration,

    /// Retries allowed after the first failure
    pub max_retries: u32,

    /// Adds up to one extra delay at random
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_delay,
            max_retries,
            jitter: true,
        }
    }

    /// Sets whether to use jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Builds the exponential backoff schedule for this policy
    #[must_use]
    pub fn into_backoff(&self, jitter: bool) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries as usize);

        if jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Delay after the `failures`-th consecutive failure, before jitter
    ///
    /// `base * 2^(failures - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let step = failures.saturating_sub(1) as usize;
        let schedule = ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_max_delay(self.max_delay)
            .with_max_times(step + 1)
            .build();
        schedule.last().unwrap_or(self.max_delay)
    }

    /// Decides whether to retry after `failures` consecutive counted failures
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures == 0 {
            return RetryDecision::GiveUp;
        }

        match self
            .into_backoff(self.jitter)
            .build()
            .nth(failures as usize - 1)
        {
            Some(delay) => RetryDecision::Retry(delay),
            None => RetryDecision::GiveUp,
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_retries,
        )
        .with_jitter(config.jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 3).with_jitter(false)
    }

    #[test]
    fn test_delays_double_until_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(60), Duration::from_secs(1));
    }

    #[test]
    fn test_gives_up_past_ceiling() {
        let policy = policy();
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(3),
            RetryDecision::Retry(Duration::from_millis(400))
        );
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy().with_jitter(true);
        for _ in 0..100 {
            match policy.decide(2) {
                RetryDecision::Retry(delay) => {
                    assert!(delay >= Duration::from_millis(200));
                    assert!(delay <= Duration::from_millis(400));
                }
                RetryDecision::GiveUp => panic!("expected a retry"),
            }
        }
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            max_retries: 5,
            jitter: false,
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.base, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert_eq!(policy.max_retries, 5);
        assert!(!policy.jitter);
    }
}
