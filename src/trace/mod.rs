//! Per-call observation: tracing, cost attribution, metrics.
//!
//! The [`Tracer`] wraps every externally visible call attempt (cache hits
//! included) and writes exactly one [`AiCallTrace`] per attempt: latency,
//! tokens, cost, confidence, and the classified error category. Each
//! trace feeds the [`AiMetrics`] aggregates and the per-operation
//! [`CostTracker`].

mod cost;
mod metrics;

pub use cost::{CostCalculator, CostTracker};
pub use metrics::{AiMetrics, MetricRow};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::AiError;
use crate::llm::classify;
use crate::operation::Operation;

/// What the wrapped call reports back for observation.
#[derive(Debug, Clone, Default)]
pub struct TraceOutput {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub confidence: Option<f64>,
    pub cache_hit: bool,
}

/// One observed call attempt.
#[derive(Debug, Clone)]
pub struct AiCallTrace {
    pub id: uuid::Uuid,
    pub operation: Operation,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub confidence: Option<f64>,
    pub cache_hit: bool,
    pub error_category: Option<&'static str>,
}

/// Wraps calls with timing, cost calculation, and metric recording.
pub struct Tracer {
    calculator: Arc<CostCalculator>,
    tracker: Arc<CostTracker>,
    metrics: Arc<AiMetrics>,
}

impl Tracer {
    pub fn new(
        calculator: Arc<CostCalculator>,
        tracker: Arc<CostTracker>,
        metrics: Arc<AiMetrics>,
    ) -> Self {
        Self {
            calculator,
            tracker,
            metrics,
        }
    }

    /// Run `fut`, observe it, and return the trace alongside the original
    /// outcome.
    ///
    /// Cost is computed only when tokens were actually consumed, so cache
    /// hits and failed calls trace at zero cost.
    pub async fn trace<T, Fut>(
        &self,
        operation: Operation,
        model: &str,
        fut: Fut,
    ) -> (AiCallTrace, Result<T, AiError>)
    where
        Fut: Future<Output = Result<(T, TraceOutput), AiError>>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = fut.await;
        let latency = start.elapsed();

        let (output, result) = match outcome {
            Ok((value, output)) => (output, Ok(value)),
            Err(err) => (TraceOutput::default(), Err(err)),
        };

        let error_category = result
            .as_ref()
            .err()
            .map(|err| classify(None, err).category.as_str());

        let cost = if output.input_tokens > 0 || output.output_tokens > 0 {
            self.calculator
                .calculate(model, output.input_tokens, output.output_tokens)
        } else {
            Decimal::ZERO
        };

        let trace = AiCallTrace {
            id: uuid::Uuid::new_v4(),
            operation,
            model: model.to_string(),
            started_at,
            latency,
            input_tokens: output.input_tokens,
            output_tokens: output.output_tokens,
            cost,
            confidence: output.confidence,
            cache_hit: output.cache_hit,
            error_category,
        };

        self.metrics.record(&MetricRow {
            operation: operation.id(),
            model: trace.model.clone(),
            latency,
            input_tokens: trace.input_tokens,
            output_tokens: trace.output_tokens,
            cost,
            confidence: trace.confidence,
            cache_hit: trace.cache_hit,
            error_category,
        });
        self.tracker.add(operation.id(), cost);

        tracing::debug!(
            operation = %operation,
            model = %trace.model,
            latency_ms = latency.as_millis() as u64,
            cache_hit = trace.cache_hit,
            cost = %cost,
            error = ?error_category,
            "AI call traced"
        );

        (trace, result)
    }
}
