//! Error types for the orchestration engine.

use std::time::Duration;

use rust_decimal::Decimal;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache-related errors.
///
/// Cache failures are non-fatal throughout the engine: callers log and
/// continue without the affected layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to open cache store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Cache store is closed")]
    Closed,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by AI operations.
///
/// These are the surface forms seen by callers of the orchestrating
/// service; the classifier in `llm::classify` maps each to a retry
/// category (transient / permanent / content).
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI service unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Response truncated at {max_tokens} tokens")]
    Truncated { max_tokens: u32 },

    #[error("Model refused the request: {message}")]
    Refused { message: String },

    #[error("Response blocked by content filter")]
    ContentFiltered,

    #[error("Invalid structured output: {reason}")]
    InvalidOutput { reason: String },

    #[error("Output validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Budget exceeded: spent {spent} of {budget}")]
    BudgetExceeded { spent: Decimal, budget: Decimal },

    #[error("Circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Prompt injection detected: {pattern}")]
    InjectionDetected { pattern: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// Short machine-readable name used as the `type` label on error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AiError::Unavailable { .. } => "unavailable",
            AiError::RateLimited { .. } => "rate_limited",
            AiError::Truncated { .. } => "truncated",
            AiError::Refused { .. } => "refused",
            AiError::ContentFiltered => "content_filtered",
            AiError::InvalidOutput { .. } => "invalid_output",
            AiError::ValidationFailed { .. } => "validation_failed",
            AiError::BudgetExceeded { .. } => "budget_exceeded",
            AiError::CircuitOpen { .. } => "circuit_open",
            AiError::InjectionDetected { .. } => "injection_detected",
            AiError::Cancelled => "cancelled",
            AiError::Json(_) => "json",
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
