//! Input guards: prompt-injection detection and PII redaction.
//!
//! Both run before any user content reaches prompt assembly. Injection
//! findings reject the request; redaction transforms it and lets it
//! through.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::AiError;

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+instructions",
        r"(?i)disregard\s+(the\s+)?(system\s+prompt|your\s+instructions)",
        r"(?i)you\s+are\s+now\s+(a|an|in)\b",
        r"(?i)\bDAN\s+mode\b",
        r"(?i)reveal\s+(your\s+)?(system\s+prompt|instructions)",
        r"(?i)<\s*/?\s*system\s*>",
        r"(?i)^\s*system\s*:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("injection pattern must compile"))
    .collect()
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d{0,2}\s?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}").expect("phone pattern")
});

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(sk|pk|api|key)[-_][A-Za-z0-9_\-]{16,}\b").expect("api key pattern")
});

/// Reject input that tries to subvert the system prompt.
pub fn check_injection(input: &str) -> Result<(), AiError> {
    for pattern in INJECTION_PATTERNS.iter() {
        if let Some(found) = pattern.find(input) {
            tracing::warn!(pattern = %pattern.as_str(), "prompt injection detected in input");
            return Err(AiError::InjectionDetected {
                pattern: found.as_str().to_string(),
            });
        }
    }
    Ok(())
}

/// Replace obvious PII and credentials with placeholders before the
/// content leaves the process.
pub fn redact_pii(input: &str) -> String {
    let redacted = EMAIL_RE.replace_all(input, "[email]");
    let redacted = API_KEY_RE.replace_all(&redacted, "[api_key]");
    let redacted = PHONE_RE.replace_all(&redacted, "[phone]");
    redacted.into_owned()
}
