//! Versioned prompt management.
//!
//! The [`PromptRegistry`] stores content-hashed prompt versions per
//! operation; the [`PromptBuilder`] composes the final system prompt from
//! the base content, context hints, an optional refinement block, the
//! operation's JSON schema reminder, and few-shot examples selected by the
//! [`ExampleStore`]. Identical inputs always produce byte-identical output
//! and therefore an identical hash.

mod builder;
mod examples;
mod registry;

pub use builder::{BuiltPrompt, PromptBuilder, PromptContext};
pub use examples::{Example, ExampleStore};
pub use registry::{PROMPT_ENV_PREFIX, PromptEntry, PromptRegistry, register_default_prompts};
