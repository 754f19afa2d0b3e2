//! Bounded retry with exponential backoff and jitter.
//!
//! Only errors that report [`crate::error::Error::is_transient`] are retried; not-found and
//! permission failures return on the first attempt.

use crate::error::Result;
use crate::models::settings::RemoteSection;
use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn from_settings(remote: &RemoteSection) -> Self {
        Self {
            max_attempts: remote.max_attempts.max(1),
            initial_delay: Duration::from_millis(remote.initial_backoff_ms),
            max_delay: Duration::from_millis(remote.max_backoff_ms),
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `operation` until it succeeds, fails terminally, or attempts run out.
pub fn with_backoff<T, F>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                error!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "operation failed after max attempts"
                );
                return Err(e);
            }
            Err(e) => {
                let jittered = jitter(delay);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis() as u64,
                    "transient failure, retrying"
                );
                if !jittered.is_zero() {
                    thread::sleep(jittered);
                }
                delay = next_delay(delay, policy);
            }
        }
    }
}

// 0.5x to 1.5x of the nominal delay
fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

fn next_delay(delay: Duration, policy: &RetryPolicy) -> Duration {
    let next = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier);
    next.min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_retries_transient_until_success() {
        let calls = Cell::new(0);
        let result = with_backoff(&fast(3), "op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::backend("gcloud", true, "UNAVAILABLE"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<()> = with_backoff(&fast(2), "op", || {
            calls.set(calls.get() + 1);
            Err(Error::backend("kubectl", true, "connection refused"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_terminal_errors_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = with_backoff(&fast(5), "op", || {
            calls.set(calls.get() + 1);
            Err(Error::SecretNotFound {
                resource: "projects/p/secrets/x".into(),
            })
        });
        assert!(matches!(result, Err(Error::SecretNotFound { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(
            next_delay(Duration::from_millis(400), &policy),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_from_settings_enforces_one_attempt() {
        let remote = RemoteSection {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_settings(&remote).max_attempts, 1);
    }
}
