//! Retryable-call abstraction shared by every generation caller.
//!
//! A [`RetryPolicy`] bounds the number of attempts and sleeps a linearly
//! growing delay between them (`backoff × attempt`). Fatal errors, as
//! classified by [`crate::ModelError::is_retryable`], stop immediately.

use std::thread;
use std::time::Duration;

use crate::error::ModelResult;

/// Default number of attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay unit between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// on exhaustion.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> ModelResult<T>
    where
        F: FnMut(u32) -> ModelResult<T>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!("{label}: fatal error on attempt {attempt}/{max}: {e}");
                    return Err(e);
                }
                Err(e) if attempt >= max => {
                    tracing::warn!("{label}: giving up after {max} attempts: {e}");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        "{label}: attempt {attempt}/{max} failed ({e}), retrying in {:?}",
                        delay
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = fast(3).run("test", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(ModelError::malformed("not json"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let mut calls = 0;
        let result: ModelResult<()> = fast(3).run("test", |attempt| {
            calls += 1;
            Err(ModelError::malformed(format!("attempt {attempt}")))
        });
        assert_eq!(calls, 3);
        assert!(result.unwrap_err().to_string().contains("attempt 3"));
    }

    #[test]
    fn test_fatal_error_stops_immediately() {
        let mut calls = 0;
        let result: ModelResult<()> = fast(5).run("test", |_| {
            calls += 1;
            Err(ModelError::HttpStatus {
                status: 401,
                message: "unauthorized".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
