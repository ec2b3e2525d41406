//! Bounded retry with exponential backoff.
//!
//! One policy type serves every call site: request-level retries around
//! collaborator calls, and the longer settle-wait poll that waits for the
//! artifact manager to finish provisioning a repository. Call sites differ
//! only in attempt count and base delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Cancelled;

/// Largest exponent applied to the base delay.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Attempt budget and backoff baseline for one kind of call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for every retry after it
    /// (milliseconds).
    pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::request()
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
        }
    }

    /// Budget for a single HTTP request against a collaborator.
    pub const fn request() -> Self {
        Self::new(3, 500)
    }

    /// Budget for waiting on a freshly created repository (2s, 4s, 8s, 16s).
    pub const fn settle() -> Self {
        Self::new(5, 2_000)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay slept before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(1u64 << shift))
    }

    /// Run `work` until it succeeds or the attempt budget is spent.
    ///
    /// On exhaustion the last error is returned as-is. Cancellation is
    /// checked before every attempt and interrupts backoff sleeps.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, work: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled> + Display,
    {
        self.run_if(cancel, work, |_| true).await
    }

    /// Like [`RetryPolicy::run`], but stops at the first error for which
    /// `retryable` returns `false`.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut work: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled> + Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let err = match work(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts || !retryable(&err) {
                return Err(err);
            }

            attempt += 1;
            let delay = self.delay_before(attempt);
            debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying");

            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Free-function form of [`RetryPolicy::run`].
pub async fn retry<T, E, F, Fut>(
    max_attempts: u32,
    initial_delay: Duration,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Cancelled> + Display,
{
    RetryPolicy::new(max_attempts, initial_delay.as_millis() as u64)
        .run(cancel, work)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient(u32),
        Fatal,
        Cancelled,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    #[test]
    fn test_delay_schedule_doubles_from_baseline() {
        let policy = RetryPolicy::new(5, 100);
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
        assert_eq!(policy.delay_before(5), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_does_not_overflow() {
        let policy = RetryPolicy::new(u32::MAX, u64::MAX / 2);
        assert_eq!(policy.delay_before(1_000), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_settle_defaults() {
        let policy = RetryPolicy::settle();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(5), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_sleep() {
        let start = Instant::now();
        let result: Result<u32, TestError> = RetryPolicy::new(3, 1_000)
            .run(&CancellationToken::new(), |attempt| async move { Ok(attempt) })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let result: Result<&str, TestError> = RetryPolicy::new(4, 100)
            .run(&CancellationToken::new(), {
                let calls = calls.clone();
                move |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(TestError::Transient(attempt))
                        } else {
                            Ok("done")
                        }
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let result: Result<(), TestError> = RetryPolicy::new(3, 10)
            .run(&CancellationToken::new(), |attempt| async move {
                Err(TestError::Transient(attempt))
            })
            .await;
        assert_eq!(result, Err(TestError::Transient(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), TestError> = RetryPolicy::new(5, 10)
            .run_if(
                &CancellationToken::new(),
                {
                    let calls = calls.clone();
                    move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err(TestError::Fatal) }
                    }
                },
                |err| matches!(err, TestError::Transient(_)),
            )
            .await;
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let result: Result<u32, TestError> = RetryPolicy::new(0, 10)
            .run(&CancellationToken::new(), |attempt| async move {
                Err(TestError::Transient(attempt))
            })
            .await;
        assert_eq!(result, Err(TestError::Transient(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), TestError> = RetryPolicy::new(3, 10)
            .run(&cancel, |_| async { Ok(()) })
            .await;
        assert_eq!(result, Err(TestError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<(), TestError> = RetryPolicy::new(3, 60_000)
            .run(&cancel, |attempt| async move {
                Err(TestError::Transient(attempt))
            })
            .await;
        assert_eq!(result, Err(TestError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_function_form() {
        let result: Result<u32, TestError> = retry(
            2,
            Duration::from_millis(5),
            &CancellationToken::new(),
            |attempt| async move {
                if attempt == 1 {
                    Err(TestError::Transient(1))
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;
        assert_eq!(result, Ok(2));
    }
}
