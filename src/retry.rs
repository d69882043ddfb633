//! Bounded retry with exponential backoff
//!
//! Used while waiting for the store to accept connections at startup. After
//! the last attempt the error is handed back to the caller instead of
//! looping forever, so an unreachable store halts startup.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
        }
    }
}

#[derive(Debug)]
struct BackoffState {
    failures: u32,
    current_delay: Duration,
}

impl BackoffState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            failures: 0,
            current_delay: initial_delay,
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
    }

    fn grow(&mut self, max_delay: Duration) {
        self.current_delay = std::cmp::min(self.current_delay * 2, max_delay);
    }
}

/// Run `task_fn` until it succeeds or `policy.max_attempts` is reached.
///
/// # Arguments
/// * `task_name` - Name used in log lines
/// * `policy` - Attempt budget and backoff bounds
/// * `task_fn` - Produces one attempt
///
/// # Errors
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    task_name: &str,
    policy: &RetryPolicy,
    mut task_fn: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = BackoffState::new(policy.initial_delay);

    loop {
        match task_fn().await {
            Ok(value) => {
                if state.failures > 0 {
                    info!(
                        "'{}' succeeded after {} failed attempt(s)",
                        task_name, state.failures
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                state.record_failure();

                if state.failures >= max_attempts {
                    error!(
                        "'{}' failed after {} attempt(s): {}",
                        task_name, state.failures, e
                    );
                    return Err(e);
                }

                warn!(
                    "'{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                    task_name, state.failures, max_attempts, e, state.current_delay
                );
                sleep(state.current_delay).await;
                state.grow(policy.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<&str, String> =
            retry_with_backoff("flaky_task", &fast_policy(5), || {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err("Simulated failure".to_string())
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), String> =
            retry_with_backoff("failing_task", &fast_policy(3), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("Always fails".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "Always fails");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let _: Result<(), String> = retry_with_backoff("once", &fast_policy(0), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("nope".to_string()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut state = BackoffState::new(Duration::from_millis(10));
        state.grow(Duration::from_millis(25));
        assert_eq!(state.current_delay, Duration::from_millis(20));
        state.grow(Duration::from_millis(25));
        assert_eq!(state.current_delay, Duration::from_millis(25));
    }
}
