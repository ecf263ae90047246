//! Error classification driving retry and fallback decisions.

use crate::error::AiError;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Worth retrying: network, saturation, rate limits, cancellation.
    Transient,
    /// Retrying cannot help: bad request, failed validation.
    Permanent,
    /// Content-policy outcomes: refusals, filters, truncation.
    Content,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Content => "content",
        }
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone)]
pub struct Classification {
    pub category: ErrorCategory,
    /// Whether an automatic retry (same request, same provider tier) is
    /// worthwhile.
    pub should_retry: bool,
    pub status_code: Option<u16>,
    pub message: String,
}

/// Classify a failure from its error value and, when known, the upstream
/// HTTP status. Rules apply in order; the final default is transient
/// because the outer retry loop is bounded either way.
///
/// `Truncated` is content-class and not auto-retried: an outer caller may
/// re-issue with a larger token cap, the retry layer never does.
pub fn classify(status_code: Option<u16>, error: &AiError) -> Classification {
    let message = error.to_string();
    let mk = |category, should_retry| Classification {
        category,
        should_retry,
        status_code,
        message: message.clone(),
    };

    // 1. Content sentinels.
    match error {
        AiError::Refused { .. } | AiError::ContentFiltered => {
            return mk(ErrorCategory::Content, false);
        }
        AiError::Truncated { .. } => {
            return mk(ErrorCategory::Content, false);
        }
        // 2. Output/validation sentinels.
        AiError::InvalidOutput { .. } | AiError::ValidationFailed { .. } | AiError::Json(_) => {
            return mk(ErrorCategory::Permanent, false);
        }
        AiError::InjectionDetected { .. } => {
            return mk(ErrorCategory::Permanent, false);
        }
        // 3. Rate-limit / unavailability sentinels.
        AiError::RateLimited { .. } => {
            return mk(ErrorCategory::Transient, true);
        }
        AiError::CircuitOpen { .. } | AiError::BudgetExceeded { .. } => {
            // Suppressed locally, not an upstream fault; retrying the same
            // call immediately cannot succeed.
            return mk(ErrorCategory::Transient, false);
        }
        // 5. Cancellation is transient so callers can distinguish it from
        // protocol failure.
        AiError::Cancelled => {
            return mk(ErrorCategory::Transient, false);
        }
        AiError::Unavailable { .. } => {}
    }

    // 4. HTTP status rules for errors without a more specific sentinel.
    if let Some(status) = status_code {
        return match status {
            429 => mk(ErrorCategory::Transient, true),
            408 | 504 => mk(ErrorCategory::Transient, true),
            s if s >= 500 => mk(ErrorCategory::Transient, true),
            // 6. Remaining client errors are not retryable.
            s if s >= 400 => mk(ErrorCategory::Permanent, false),
            _ => mk(ErrorCategory::Transient, true),
        };
    }

    // 7. Safer default: transient.
    mk(ErrorCategory::Transient, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn refusal_is_content_no_retry() {
        let c = classify(None, &AiError::Refused { message: "no".into() });
        assert_eq!(c.category, ErrorCategory::Content);
        assert!(!c.should_retry);
    }

    #[test]
    fn truncation_is_content_not_auto_retried() {
        let c = classify(None, &AiError::Truncated { max_tokens: 1024 });
        assert_eq!(c.category, ErrorCategory::Content);
        assert!(!c.should_retry);
    }

    #[test]
    fn validation_failure_is_permanent() {
        let c = classify(
            None,
            &AiError::ValidationFailed {
                reason: "dup".into(),
            },
        );
        assert_eq!(c.category, ErrorCategory::Permanent);
        assert!(!c.should_retry);
    }

    #[test]
    fn rate_limit_is_transient_retryable() {
        let c = classify(
            Some(429),
            &AiError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
            },
        );
        assert_eq!(c.category, ErrorCategory::Transient);
        assert!(c.should_retry);
        assert_eq!(c.status_code, Some(429));
    }

    #[test]
    fn http_status_rules() {
        let unavailable = AiError::Unavailable {
            reason: "upstream".into(),
        };
        assert_eq!(
            classify(Some(500), &unavailable).category,
            ErrorCategory::Transient
        );
        assert_eq!(
            classify(Some(503), &unavailable).category,
            ErrorCategory::Transient
        );
        assert!(classify(Some(408), &unavailable).should_retry);
        assert!(classify(Some(504), &unavailable).should_retry);
        assert_eq!(
            classify(Some(404), &unavailable).category,
            ErrorCategory::Permanent
        );
        assert_eq!(
            classify(Some(400), &unavailable).category,
            ErrorCategory::Permanent
        );
        assert_eq!(
            classify(Some(429), &unavailable).category,
            ErrorCategory::Transient
        );
    }

    #[test]
    fn cancellation_is_transient_not_retried() {
        let c = classify(None, &AiError::Cancelled);
        assert_eq!(c.category, ErrorCategory::Transient);
        assert!(!c.should_retry);
    }

    #[test]
    fn unknown_defaults_to_transient() {
        let c = classify(
            None,
            &AiError::Unavailable {
                reason: "connection reset".into(),
            },
        );
        assert_eq!(c.category, ErrorCategory::Transient);
        assert!(c.should_retry);
    }
}
