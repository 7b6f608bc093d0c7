//! Retry
//!
//! Bounded retry of async operations. Only errors the caller marks as
//! retryable are tried again; anything else is returned at once.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier; 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    pub fn exponential(max_attempts: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64) * self.backoff_multiplier.powi(retry as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts run out; the last error is returned unchanged.
    ///
    /// `on_failure` sees every failed attempt (1-based) before any delay.
    pub async fn run<F, Fut, T, E>(
        &self,
        mut operation: F,
        is_retryable: impl Fn(&E) -> bool,
        mut on_failure: impl FnMut(usize, &E),
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    on_failure(attempt, &e);
                    if !is_retryable(&e) || attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for_retry(attempt - 1);
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delays() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_retry(0), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_retry(4), Duration::from_millis(500));

        let backoff = RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(backoff.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let mut failures = Vec::new();
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let result: Result<usize, String> = policy
            .run(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("busy {n}")) } else { Ok(n) }
                },
                |_| true,
                |attempt, e| failures.push((attempt, e.clone())),
            )
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(failures, vec![(1, "busy 1".to_string()), (2, "busy 2".to_string())]);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("syntax error".to_string())
                },
                |e| !e.contains("syntax"),
                |_, _| {},
            )
            .await;
        assert_eq!(result, Err("syntax error".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run(
                || async { Err(format!("timeout {}", calls.fetch_add(1, Ordering::SeqCst) + 1)) },
                |_| true,
                |_, _| {},
            )
            .await;
        assert_eq!(result, Err("timeout 3".to_string()));
    }
}
