//! LLM provider trait and request/response types.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::AiError;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

/// A structured-output request.
///
/// `schema` is a JSON schema (strict mode) the provider is expected to
/// conform to; providers that cannot enforce it server-side return the
/// raw content and [`CheckedProvider`](super::CheckedProvider) validates.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system_prompt: String,
    pub user_content: String,
    pub schema: Value,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Override of the provider's default model.
    pub model: Option<String>,
}

impl StructuredRequest {
    pub fn new(system_prompt: impl Into<String>, user_content: impl Into<String>, schema: Value) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_content: user_content.into(),
            schema,
            max_tokens: 4096,
            temperature: 0.0,
            model: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A structured-output response.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: FinishReason,
    /// Non-empty when the model declined the request outright.
    pub refusal: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Providers tried before this response was produced (set by the chain).
    pub attempts: u32,
    /// Whether a non-primary provider produced this response.
    pub fallback_used: bool,
}

/// Trait for LLM providers.
///
/// A cancelled token must surface as [`AiError::Cancelled`], which the
/// classifier treats as transient so callers can tell user cancellation
/// from protocol failure.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for logs.
    fn name(&self) -> &str;

    /// Default model identifier, part of every cache key.
    fn model_id(&self) -> &str;

    /// Issue a structured-output call.
    async fn call_structured(
        &self,
        request: StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<StructuredResponse, AiError>;
}
