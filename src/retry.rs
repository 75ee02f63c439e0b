//! Bounded retry with exponential backoff for external calls.

use crate::error::{KbError, Result};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff policy: `base_delay * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Whether `RateLimited` denials are waited out and retried
    pub retry_rate_limited: bool,
}

impl Backoff {
    pub fn new(max_retries: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            retry_rate_limited: true,
        }
    }

    /// Same policy, but a rate-limit denial is returned at once
    pub fn without_rate_limit_retries(mut self) -> Self {
        self.retry_rate_limited = false;
        self
    }

    fn should_retry(&self, error: &KbError, attempt: usize) -> bool {
        if attempt >= self.max_retries || !error.is_retryable() {
            return false;
        }
        self.retry_rate_limited || !matches!(error, KbError::RateLimited { .. })
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16) as u32);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or exhausts `max_retries`. The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    let mut delay = self.delay_for(attempt);
                    if let KbError::RateLimited { retry_after_secs } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after_secs)).min(self.max_delay);
                    }
                    log::warn!(
                        "{}: retry {}/{} in {:?} after error: {}",
                        what,
                        attempt + 1,
                        self.max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run `fut` under `limit`; elapsing is reported as `KbError::Timeout`.
pub async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(KbError::Timeout(format!("{} exceeded {:?}", what, limit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> Backoff {
        Backoff::new(3, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let backoff = Backoff::new(5, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = fast()
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(KbError::Index("transient".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast()
            .run("always failing", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KbError::Index("down".into()))
            })
            .await;
        assert!(matches!(result, Err(KbError::Index(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast()
            .run("bad input", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KbError::InvalidInput("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_returned_at_once_when_not_retried() {
        let calls = AtomicUsize::new(0);
        let backoff = Backoff::new(3, Duration::from_secs(1), Duration::from_secs(16))
            .without_rate_limit_retries();
        let started = std::time::Instant::now();
        let result: Result<()> = backoff
            .run("limited", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KbError::RateLimited { retry_after_secs: 60 })
            })
            .await;
        assert!(matches!(result, Err(KbError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_other_errors_still_retried_without_rate_limit_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast()
            .without_rate_limit_retries()
            .run("flaky", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KbError::Embedding("503".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(KbError::Timeout(_))));
    }
}
