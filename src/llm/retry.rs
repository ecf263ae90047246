//! Retry decorator with jittered exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::classify::classify;
use super::provider::{Provider, StructuredRequest, StructuredResponse};
use crate::error::AiError;

/// Configuration for the retry decorator.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay, doubled per attempt.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Provider decorator that retries transient failures.
///
/// Delay for attempt `k` is `base_delay * 2^k` plus a uniform jitter in
/// `[0, delay/4]`. A provider-supplied `retry_after` wins over the
/// computed delay. The backoff sleep races the cancellation token so a
/// cancelled caller never waits out a long delay.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn delay_for(&self, attempt: u32, error: &AiError) -> Duration {
        if let AiError::RateLimited {
            retry_after: Some(after),
        } = error
        {
            return *after;
        }
        let base = self.config.base_delay * 2u32.saturating_pow(attempt);
        let jitter_cap = (base / 4).as_millis() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn call_structured(
        &self,
        request: StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<StructuredResponse, AiError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(AiError::Cancelled);
            }
            match self.inner.call_structured(request.clone(), cancel).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let classification = classify(None, &err);
                    if !classification.should_retry || attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(
                        provider = %self.inner.name(),
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider failure, backing off before retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(AiError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }
}
