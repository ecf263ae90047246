//! Test support: scripted stub implementations of the provider contract.
//!
//! Compiled into the crate (not `#[cfg(test)]`) so integration tests and
//! downstream consumers can drive the orchestration stack without a live
//! backend.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AiError;
use crate::llm::{FinishReason, Provider, StructuredRequest, StructuredResponse};

enum Step {
    Content(String),
    Fail(AiError),
}

enum DefaultStep {
    Content(String),
    Refusal(String),
    Finish(FinishReason, String),
    Fail(Box<dyn Fn() -> AiError + Send + Sync>),
}

/// A scripted LLM provider.
///
/// Steps queued with [`scripted`](Self::scripted) are consumed first; once
/// the queue is empty every further call repeats the default behavior the
/// constructor set up.
pub struct StubProvider {
    name: String,
    model: String,
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step>>,
    default: DefaultStep,
    last_request: Mutex<Option<StructuredRequest>>,
    input_tokens: u32,
    output_tokens: u32,
}

impl StubProvider {
    fn with_default(default: DefaultStep) -> Self {
        Self {
            name: "stub".to_string(),
            model: "stub-model".to_string(),
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            default,
            last_request: Mutex::new(None),
            input_tokens: 120,
            output_tokens: 40,
        }
    }

    /// Always succeeds with `content`.
    pub fn succeeding(content: &str) -> Self {
        Self::with_default(DefaultStep::Content(content.to_string()))
    }

    /// Always fails with a transient unavailability error.
    pub fn always_failing() -> Self {
        Self::failing_with(|| AiError::Unavailable {
            reason: "stubbed failure".to_string(),
        })
    }

    /// Always fails with the error produced by `factory`.
    pub fn failing_with(factory: impl Fn() -> AiError + Send + Sync + 'static) -> Self {
        Self::with_default(DefaultStep::Fail(Box::new(factory)))
    }

    /// Fails transiently `n` times, then succeeds with `content` forever.
    pub fn failing_n_times(n: usize, content: &str) -> Self {
        let stub = Self::succeeding(content);
        {
            let mut script = stub.script.lock().unwrap();
            for _ in 0..n {
                script.push_back(Step::Fail(AiError::Unavailable {
                    reason: "stubbed transient failure".to_string(),
                }));
            }
        }
        stub
    }

    /// Always returns a refusal.
    pub fn refusing(message: &str) -> Self {
        Self::with_default(DefaultStep::Refusal(message.to_string()))
    }

    /// Always finishes with `reason` and `content`.
    pub fn finishing_with(reason: FinishReason, content: &str) -> Self {
        Self::with_default(DefaultStep::Finish(reason, content.to_string()))
    }

    /// Consumes `steps` in order, then falls back to succeeding with the
    /// last successful content (or failing if none).
    pub fn scripted(steps: Vec<Result<String, AiError>>) -> Self {
        let default = steps
            .iter()
            .rev()
            .find_map(|s| s.as_ref().ok().cloned())
            .map(DefaultStep::Content)
            .unwrap_or_else(|| {
                DefaultStep::Fail(Box::new(|| AiError::Unavailable {
                    reason: "script exhausted".to_string(),
                }))
            });
        let stub = Self::with_default(default);
        {
            let mut script = stub.script.lock().unwrap();
            for step in steps {
                script.push_back(match step {
                    Ok(content) => Step::Content(content),
                    Err(err) => Step::Fail(err),
                });
            }
        }
        stub
    }

    /// Override the provider name and model id.
    pub fn named(mut self, name: &str, model: &str) -> Self {
        self.name = name.to_string();
        self.model = model.to_string();
        self
    }

    /// Override the token counts reported on success.
    pub fn with_tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// The most recent request, if any call was made.
    pub fn last_request(&self) -> Option<StructuredRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn respond(&self, content: String, finish: FinishReason, refusal: Option<String>, model: Option<String>) -> StructuredResponse {
        StructuredResponse {
            content,
            model: model.unwrap_or_else(|| self.model.clone()),
            finish_reason: finish,
            refusal,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            attempts: 1,
            fallback_used: false,
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn call_structured(
        &self,
        request: StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<StructuredResponse, AiError> {
        if cancel.is_cancelled() {
            return Err(AiError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        let model = request.model.clone();
        *self
            .last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(request);

        if let Some(step) = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return match step {
                Step::Content(content) => Ok(self.respond(content, FinishReason::Stop, None, model)),
                Step::Fail(err) => Err(err),
            };
        }

        match &self.default {
            DefaultStep::Content(content) => {
                Ok(self.respond(content.clone(), FinishReason::Stop, None, model))
            }
            DefaultStep::Refusal(message) => Ok(self.respond(
                String::new(),
                FinishReason::Stop,
                Some(message.clone()),
                model,
            )),
            DefaultStep::Finish(reason, content) => {
                Ok(self.respond(content.clone(), *reason, None, model))
            }
            DefaultStep::Fail(factory) => Err(factory()),
        }
    }
}
