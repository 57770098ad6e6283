//! Bounded retry with exponential backoff for transient network failures.
//!
//! Only errors classified as retryable ([`EngineError::is_retryable`]) are
//! retried. Everything else is returned on the first occurrence.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Backoff ceiling.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 8;

pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How an operation handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// Single attempt.
    None,

    /// Exponential backoff.
    ///
    /// The delay grows by `multiplier` after each failed attempt, up to
    /// `max_delay`.
    ExponentialBackoff {
        /// Total attempts, the first one included.
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Backoff policy allowing `max_attempts` attempts (at least one).
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Calculates the delay before retry number `attempt` (1-based).
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt == 0 || attempt >= *max_attempts {
                    return None;
                }
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let scaled_ms = (initial_delay.as_millis() as f64 * multiplier.powi(exponent))
                    .round()
                    .min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(scaled_ms as u64))
            }
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> EngineResult<T>
    where
        F: FnMut(u32) -> EngineResult<T>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.delay_for_attempt(attempt) {
                    Some(delay) => {
                        warn!(
                            operation = what,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "transient failure, retrying"
                        );
                        thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Convenience for building a retryable error in tests and transports.
pub(crate) fn network_error(url: &str, reason: impl ToString) -> EngineError {
    EngineError::Network {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        assert_eq!(RetryPolicy::None.delay_for_attempt(1), None);
        assert_eq!(RetryPolicy::exponential(1).delay_for_attempt(1), None);
        assert_eq!(RetryPolicy::exponential(0).delay_for_attempt(1), None);
    }

    #[test]
    fn test_backoff_doubles_until_budget_spent() {
        let policy = fast_policy(4);
        let delays: Vec<_> = (1..=4).map(|a| policy.delay_for_attempt(a)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(1)),
                Some(Duration::from_millis(2)),
                Some(Duration::from_millis(4)),
                None,
            ]
        );
    }

    #[test]
    fn test_backoff_capped() {
        let policy = fast_policy(20);
        assert_eq!(policy.delay_for_attempt(12), Some(Duration::from_millis(4)));
    }

    #[test]
    fn test_fetch_defaults() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for_attempt(DEFAULT_MAX_ATTEMPTS - 1).is_some());
        assert_eq!(policy.delay_for_attempt(DEFAULT_MAX_ATTEMPTS), None);
        assert_eq!(
            policy.delay_for_attempt(2),
            Some(Duration::from_millis(2 * DEFAULT_INITIAL_DELAY_MS))
        );
    }

    #[test]
    fn test_run_retries_transient_errors() {
        let policy = fast_policy(3);
        let mut calls = 0;
        let result = policy.run("test", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(network_error("http://x", "reset"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_run_gives_up_after_budget() {
        let policy = fast_policy(2);
        let mut calls = 0;
        let result: EngineResult<()> = policy.run("test", |_| {
            calls += 1;
            Err(network_error("http://x", "reset"))
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_run_does_not_retry_permanent_errors() {
        let policy = fast_policy(5);
        let mut calls = 0;
        let result: EngineResult<()> = policy.run("test", |_| {
            calls += 1;
            Err(EngineError::IntegrityMismatch {
                url: "u".to_string(),
                expected: "a".to_string(),
                actual: "b".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
