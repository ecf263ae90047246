//! Structured-output gate: finish reasons, refusals, and schema conformance.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::provider::{FinishReason, Provider, StructuredRequest, StructuredResponse};
use crate::error::AiError;

/// In-place corrective re-queries before giving up on invalid JSON.
const MAX_REQUERIES: u32 = 2;

/// Provider decorator that refuses to return malformed success.
///
/// Before passing a response through it checks, in order: a non-empty
/// refusal, a `length` finish reason, a `content_filter` finish reason,
/// then JSON parse + schema conformance of the content. Parse and schema
/// failures trigger up to [`MAX_REQUERIES`] re-queries carrying a short
/// corrective hint; after that the call surfaces
/// [`AiError::InvalidOutput`].
pub struct CheckedProvider {
    inner: Arc<dyn Provider>,
}

impl CheckedProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self { inner }
    }

    fn check_outcome(response: &StructuredResponse, max_tokens: u32) -> Result<(), AiError> {
        if let Some(refusal) = response.refusal.as_deref().filter(|r| !r.is_empty()) {
            return Err(AiError::Refused {
                message: refusal.to_string(),
            });
        }
        match response.finish_reason {
            FinishReason::Length => Err(AiError::Truncated { max_tokens }),
            FinishReason::ContentFilter => Err(AiError::ContentFiltered),
            FinishReason::Stop | FinishReason::Unknown => Ok(()),
        }
    }

    /// Parse the content and validate it against the request's schema.
    fn check_content(request: &StructuredRequest, content: &str) -> Result<(), String> {
        let parsed: serde_json::Value =
            serde_json::from_str(content).map_err(|e| format!("not parseable JSON: {e}"))?;
        let validator = jsonschema::validator_for(&request.schema)
            .map_err(|e| format!("schema failed to compile: {e}"))?;
        if let Some(first) = validator.iter_errors(&parsed).next() {
            return Err(format!("schema violation at {}: {}", first.instance_path(), first));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for CheckedProvider {
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
        let mut current = request.clone();
        let mut last_reason = String::new();

        for requery in 0..=MAX_REQUERIES {
            let response = self.inner.call_structured(current.clone(), cancel).await?;
            Self::check_outcome(&response, current.max_tokens)?;

            match Self::check_content(&request, &response.content) {
                Ok(()) => return Ok(response),
                Err(reason) => {
                    tracing::warn!(
                        provider = %self.inner.name(),
                        requery,
                        reason = %reason,
                        "structured output invalid"
                    );
                    last_reason = reason;
                    current = request.clone();
                    current.user_content = format!(
                        "{}\n\nYour previous response was invalid JSON: {}. \
                         Respond again with only a JSON object matching the schema.",
                        request.user_content, last_reason
                    );
                }
            }
        }

        Err(AiError::InvalidOutput {
            reason: last_reason,
        })
    }
}
