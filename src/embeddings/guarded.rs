use super::Embedder;
use crate::config::{EmbeddingsConfig, EMBEDDING_LIMIT};
use crate::error::Result;
use crate::guard::RateLimiter;
use crate::retry::{with_timeout, Backoff};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Embedder wrapper that enforces the `embedding` rate limit, a per-call
/// timeout and bounded retries around an inner embedder.
///
/// Every attempt (including retries) consumes one admission.
pub struct GuardedEmbedder {
    inner: Arc<dyn Embedder>,
    limiter: Arc<RateLimiter>,
    backoff: Backoff,
    timeout: Duration,
}

impl GuardedEmbedder {
    pub fn new(
        inner: Arc<dyn Embedder>,
        limiter: Arc<RateLimiter>,
        backoff: Backoff,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            limiter,
            backoff,
            timeout,
        }
    }

    /// Build from the `[embeddings]` section
    pub fn from_config(
        inner: Arc<dyn Embedder>,
        limiter: Arc<RateLimiter>,
        config: &EmbeddingsConfig,
    ) -> Self {
        let backoff = Backoff::new(
            config.max_retries,
            Duration::from_secs(1),
            Duration::from_secs(16),
        );
        Self::new(inner, limiter, backoff, Duration::from_secs(config.timeout_secs))
    }

    /// A copy for the conversation path: shares the limiter but returns a
    /// rate-limit denial immediately instead of sleeping through it.
    pub fn for_queries(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            limiter: Arc::clone(&self.limiter),
            backoff: self.backoff.clone().without_rate_limit_retries(),
            timeout: self.timeout,
        }
    }

    async fn attempt(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.limiter
            .admit_named(EMBEDDING_LIMIT, self.inner.model())?
            .into_result()?;
        with_timeout(self.timeout, "embedding request", self.inner.embed(texts)).await
    }
}

#[async_trait]
impl Embedder for GuardedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.backoff.run("embedding", || self.attempt(texts)).await
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::error::KbError;
    use crate::testing::FakeEmbedder;
    use std::collections::HashMap;

    fn limiter(limit: u32) -> Arc<RateLimiter> {
        let mut configs = HashMap::new();
        configs.insert(EMBEDDING_LIMIT.to_string(), RateLimitConfig::new(limit, 60));
        Arc::new(RateLimiter::new(configs))
    }

    fn fast_backoff(max_retries: usize) -> Backoff {
        Backoff::new(max_retries, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_passes_through_when_admitted() {
        let inner = Arc::new(FakeEmbedder::new(8));
        let guarded = GuardedEmbedder::new(
            inner.clone(),
            limiter(10),
            fast_backoff(0),
            Duration::from_secs(1),
        );

        let out = guarded.embed(&["billing".to_string(), "calendar".to_string()]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 8);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_denied_when_limit_exhausted() {
        let inner = Arc::new(FakeEmbedder::new(4));
        let guarded = GuardedEmbedder::new(
            inner.clone(),
            limiter(1),
            fast_backoff(0),
            Duration::from_secs(1),
        );

        guarded.embed(&["a".to_string()]).await.unwrap();
        let err = guarded.embed(&["b".to_string()]).await.unwrap_err();
        assert!(matches!(err, KbError::RateLimited { .. }));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(FakeEmbedder::new(4));
        inner.fail_next(2);
        let guarded = GuardedEmbedder::new(
            inner.clone(),
            limiter(10),
            fast_backoff(3),
            Duration::from_secs(1),
        );

        let out = guarded.embed(&["retry me".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_query_copy_does_not_wait_out_denials() {
        let inner = Arc::new(FakeEmbedder::new(4));
        let limiter = limiter(1);
        let guarded = GuardedEmbedder::new(
            inner.clone(),
            Arc::clone(&limiter),
            Backoff::new(3, Duration::from_secs(1), Duration::from_secs(16)),
            Duration::from_secs(1),
        );
        let queries = guarded.for_queries();

        queries.embed(&["first".to_string()]).await.unwrap();
        let started = std::time::Instant::now();
        let err = queries.embed(&["second".to_string()]).await.unwrap_err();
        assert!(matches!(err, KbError::RateLimited { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        // The limiter is shared, so the ingestion side sees the same window
        assert!(!limiter.admit_named(EMBEDDING_LIMIT, inner.model()).unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_slow_embedder_times_out() {
        let inner = Arc::new(FakeEmbedder::new(4).with_delay(Duration::from_millis(200)));
        let guarded = GuardedEmbedder::new(inner, limiter(10), fast_backoff(0), Duration::from_millis(10));

        let err = guarded.embed(&["slow".to_string()]).await.unwrap_err();
        assert!(matches!(err, KbError::Timeout(_)));
    }
}
