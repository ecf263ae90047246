//! Prompt builder: composes the final system prompt for an operation.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::{ExampleStore, PromptRegistry};
use crate::error::AiError;
use crate::operation::Operation;

/// Default number of few-shot examples appended to a prompt.
const DEFAULT_TOP_K: usize = 3;

/// Context hints woven into the prompt when present.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub schema_type: Option<String>,
    pub language: Option<String>,
    pub column_count: Option<usize>,
}

/// A fully composed system prompt.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub content: String,
    /// SHA-256 hex of `content`.
    pub hash: String,
    /// Version of the base prompt this was built from.
    pub base_version: String,
    /// `base_version ":" first 8 hex of hash` — the cache-key fragment.
    /// Covers the whole composition, so a different refinement block or
    /// example selection caches separately.
    pub cache_version: String,
    pub operation_id: &'static str,
}

/// Composes system prompts from the registry, context, and example store.
pub struct PromptBuilder {
    registry: Arc<PromptRegistry>,
    examples: Arc<ExampleStore>,
    top_k: usize,
}

impl PromptBuilder {
    pub fn new(registry: Arc<PromptRegistry>, examples: Arc<ExampleStore>) -> Self {
        Self {
            registry,
            examples,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Build the system prompt for `operation`.
    ///
    /// Section order is fixed: base content, context hints, refinement,
    /// schema reminder, few-shot examples. Identical inputs produce
    /// byte-identical content.
    pub fn build(
        &self,
        operation: Operation,
        context: &PromptContext,
        refinement: Option<&str>,
    ) -> Result<BuiltPrompt, AiError> {
        self.build_with_version(operation, context, refinement, None)
    }

    /// Like [`build`](Self::build) but pinning a specific base prompt
    /// version (used by A/B variant selection).
    pub fn build_with_version(
        &self,
        operation: Operation,
        context: &PromptContext,
        refinement: Option<&str>,
        version: Option<&str>,
    ) -> Result<BuiltPrompt, AiError> {
        let base = match version {
            Some(v) => self.registry.get_version(operation.prompt_id(), v),
            None => self.registry.get(operation.prompt_id()),
        }
        .ok_or_else(|| AiError::Unavailable {
            reason: format!("no prompt registered for operation {operation}"),
        })?;

        let mut content = base.content.clone();

        let mut hints = Vec::new();
        if let Some(schema_type) = context.schema_type.as_deref().filter(|s| !s.is_empty()) {
            hints.push(format!("- Schema type: {schema_type}"));
        }
        if let Some(language) = context.language.as_deref().filter(|s| !s.is_empty()) {
            hints.push(format!("- Language: {language}"));
        }
        if let Some(count) = context.column_count {
            hints.push(format!("- Column count: {count}"));
        }
        if !hints.is_empty() {
            content.push_str("\n\nCONTEXT HINTS:\n");
            content.push_str(&hints.join("\n"));
        }

        if let Some(refinement) = refinement.filter(|s| !s.is_empty()) {
            content.push_str("\n\nREFINEMENT:\n");
            content.push_str(refinement);
        }

        if operation.wants_schema_reminder() {
            content.push_str("\n\nRespond with a single JSON object matching this schema exactly:\n");
            content.push_str(&operation.response_schema().to_string());
        }

        let selected = self.examples.top_k(
            operation,
            context.schema_type.as_deref().unwrap_or(""),
            context.language.as_deref().unwrap_or(""),
            context.column_count,
            self.top_k,
        );
        if !selected.is_empty() {
            content.push_str("\n\nEXAMPLES:");
            for example in &selected {
                content.push_str("\n\nInput headers: ");
                content.push_str(&serde_json::to_string(&example.headers)?);
                content.push_str("\nExpected output: ");
                content.push_str(&example.expected.to_string());
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        let cache_version = format!("{}:{}", base.version, &hash[..8]);

        Ok(BuiltPrompt {
            content,
            hash,
            base_version: base.version,
            cache_version,
            operation_id: operation.id(),
        })
    }
}
