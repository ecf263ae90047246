//! Multi-provider fallback chain.
//!
//! Tries each provider in sequence until one succeeds or a permanent
//! error surfaces. Transparent to callers — it implements the same
//! [`Provider`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::classify::{ErrorCategory, classify};
use super::provider::{Provider, StructuredRequest, StructuredResponse};
use crate::error::AiError;

/// Ordered list of providers; the first is the primary.
///
/// Permanent-class errors propagate immediately because another provider
/// cannot fix them for the same request. Anything else logs and advances.
/// On success the response reports how many providers were tried and
/// whether a non-primary served it.
pub struct FallbackChain {
    providers: Vec<Arc<dyn Provider>>,
}

impl FallbackChain {
    /// Create a new chain. Returns an error if `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self, AiError> {
        if providers.is_empty() {
            return Err(AiError::Unavailable {
                reason: "fallback chain requires at least one provider".to_string(),
            });
        }
        Ok(Self { providers })
    }

    fn primary(&self) -> &dyn Provider {
        self.providers[0].as_ref()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl Provider for FallbackChain {
    fn name(&self) -> &str {
        "fallback_chain"
    }

    fn model_id(&self) -> &str {
        self.primary().model_id()
    }

    async fn call_structured(
        &self,
        request: StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<StructuredResponse, AiError> {
        let mut last_error: Option<AiError> = None;

        for (i, provider) in self.providers.iter().enumerate() {
            match provider.call_structured(request.clone(), cancel).await {
                Ok(mut response) => {
                    response.attempts = i as u32 + 1;
                    response.fallback_used = i > 0;
                    return Ok(response);
                }
                Err(err) => {
                    let classification = classify(None, &err);
                    if classification.category == ErrorCategory::Permanent {
                        return Err(err);
                    }
                    if i + 1 < self.providers.len() {
                        tracing::warn!(
                            provider = %provider.name(),
                            error = %err,
                            next_provider = %self.providers[i + 1].name(),
                            "provider failed with non-permanent error, trying next provider"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        let last = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(AiError::Unavailable {
            reason: format!(
                "service unavailable, {} providers tried (last error: {last})",
                self.providers.len()
            ),
        })
    }
}
