use super::{Generator, PromptMessage};
use crate::config::GENERATION_LIMIT;
use crate::error::Result;
use crate::guard::RateLimiter;
use crate::retry::with_timeout;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Generator wrapper enforcing the `generation` rate limit and a timeout.
///
/// Not retried: a failed reply degrades to the fallback message upstream.
pub struct GuardedGenerator {
    inner: Arc<dyn Generator>,
    limiter: Arc<RateLimiter>,
    subject: String,
    timeout: Duration,
}

impl GuardedGenerator {
    /// # Arguments
    ///
    /// * `subject` - Limiter subject shared by every generation call (usually the model name)
    pub fn new(
        inner: Arc<dyn Generator>,
        limiter: Arc<RateLimiter>,
        subject: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            limiter,
            subject: subject.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Generator for GuardedGenerator {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        self.limiter
            .admit_named(GENERATION_LIMIT, &self.subject)?
            .into_result()?;
        with_timeout(self.timeout, "generation request", self.inner.generate(messages)).await
    }
}
