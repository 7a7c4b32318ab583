//! Retry wrapper for transient provider errors.
//!
//! Retries rate-limit and 5xx failures with an incrementing wait
//! (30 s start, +30 s per attempt, capped at 10 minutes), giving up after
//! 7 attempts. Everything else is reraised immediately. Streaming
//! requests bypass the wrapper entirely.

use std::sync::Arc;
use std::time::Duration;

use sr_domain::error::{Error, Result};

use crate::traits::{BoxStream, GenerateRequest, GenerateResponse, LlmProvider, StreamEvent};

const MAX_ATTEMPTS: u32 = 7;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub increment: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_wait: Duration::from_secs(30),
            increment: Duration::from_secs(30),
            max_wait: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `n + 1` (0-based `n`): start + n * increment,
    /// capped.
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let wait = self.initial_wait + self.increment * attempt;
        wait.min(self.max_wait)
    }
}

/// Decorates any provider with the retry policy.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self { inner, policy: RetryPolicy::default() }
    }

    pub fn with_policy(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl LlmProvider for RetryingProvider {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let mut attempt = 0u32;
        loop {
            match self.inner.generate(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        tracing::error!(
                            provider = self.inner.provider_id(),
                            attempts = attempt,
                            error = %e,
                            "retries exhausted"
                        );
                        return Err(e);
                    }
                    let wait = self.policy.wait_for(attempt - 1);
                    tracing::warn!(
                        provider = self.inner.provider_id(),
                        attempt,
                        wait_secs = wait.as_secs(),
                        error = %e,
                        "transient provider error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Streaming requests are not retried; they pass through untouched.
    async fn generate_stream(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.inner.generate_stream(req).await
    }

    fn estimate_token_count(&self, text: &str) -> u64 {
        self.inner.estimate_token_count(text)
    }

    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 7,
            initial_wait: Duration::ZERO,
            increment: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    fn transient() -> Error {
        Error::LlmTransient { provider: "test".into(), message: "429".into() }
    }

    fn fatal() -> Error {
        Error::LlmFatal { provider: "test".into(), message: "auth".into() }
    }

    #[test]
    fn wait_increments_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait_for(0), Duration::from_secs(30));
        assert_eq!(policy.wait_for(1), Duration::from_secs(60));
        assert_eq!(policy.wait_for(2), Duration::from_secs(90));
        assert_eq!(policy.wait_for(100), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_error(transient())
                .then_error(transient())
                .then_text("recovered"),
        );
        let retrying = RetryingProvider::with_policy(provider.clone(), instant_policy());
        let resp = retrying.generate(GenerateRequest::default()).await.unwrap();
        assert_eq!(resp.content, "recovered");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new().then_error(fatal()).then_text("never"));
        let retrying = RetryingProvider::with_policy(provider.clone(), instant_policy());
        let err = retrying.generate(GenerateRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::LlmFatal { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn stops_after_seven_attempts() {
        let mut provider = ScriptedProvider::new();
        for _ in 0..10 {
            provider = provider.then_error(transient());
        }
        let provider = Arc::new(provider);
        let retrying = RetryingProvider::with_policy(provider.clone(), instant_policy());
        let err = retrying.generate(GenerateRequest::default()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.calls(), 7);
    }
}
