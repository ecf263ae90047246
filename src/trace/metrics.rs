//! In-memory AI call metrics with Prometheus text exposition.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// One recorded call, as written by the tracer.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub operation: &'static str,
    pub model: String,
    pub latency: Duration,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub confidence: Option<f64>,
    pub cache_hit: bool,
    pub error_category: Option<&'static str>,
}

#[derive(Default)]
struct OpStats {
    calls: u64,
    latency_total: Duration,
}

#[derive(Default)]
struct Inner {
    calls_total: u64,
    input_tokens_total: u64,
    output_tokens_total: u64,
    cost_total: Decimal,
    errors_total: u64,
    errors_by_type: HashMap<String, u64>,
    cache_hits_total: u64,
    confidence_sum: f64,
    confidence_count: u64,
    per_operation: HashMap<&'static str, OpStats>,
}

/// Aggregated metrics over all traced calls.
#[derive(Default)]
pub struct AiMetrics {
    inner: RwLock<Inner>,
}

fn escape_label_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

impl AiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, row: &MetricRow) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.calls_total += 1;
        inner.input_tokens_total += u64::from(row.input_tokens);
        inner.output_tokens_total += u64::from(row.output_tokens);
        inner.cost_total += row.cost;
        if row.cache_hit {
            inner.cache_hits_total += 1;
        }
        if let Some(confidence) = row.confidence {
            inner.confidence_sum += confidence;
            inner.confidence_count += 1;
        }
        if let Some(category) = row.error_category {
            inner.errors_total += 1;
            *inner.errors_by_type.entry(category.to_string()).or_default() += 1;
        }
        let op = inner.per_operation.entry(row.operation).or_default();
        op.calls += 1;
        op.latency_total += row.latency;
    }

    pub fn calls_total(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).calls_total
    }

    pub fn cache_hits_total(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .cache_hits_total
    }

    pub fn cost_total(&self) -> Decimal {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).cost_total
    }

    /// Render the Prometheus text exposition.
    pub fn render_prometheus(&self) -> String {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();

        out.push_str("# HELP ai_calls_total Total AI calls, including cache hits\n");
        out.push_str("# TYPE ai_calls_total counter\n");
        out.push_str(&format!("ai_calls_total {}\n", inner.calls_total));

        out.push_str("# HELP ai_tokens_input_total Total input tokens sent upstream\n");
        out.push_str("# TYPE ai_tokens_input_total counter\n");
        out.push_str(&format!("ai_tokens_input_total {}\n", inner.input_tokens_total));

        out.push_str("# HELP ai_tokens_output_total Total output tokens received\n");
        out.push_str("# TYPE ai_tokens_output_total counter\n");
        out.push_str(&format!(
            "ai_tokens_output_total {}\n",
            inner.output_tokens_total
        ));

        out.push_str("# HELP ai_cost_usd_total Accumulated cost in USD\n");
        out.push_str("# TYPE ai_cost_usd_total counter\n");
        out.push_str(&format!(
            "ai_cost_usd_total {}\n",
            inner.cost_total.to_f64().unwrap_or(0.0)
        ));

        out.push_str("# HELP ai_errors_total Failed AI calls by error category\n");
        out.push_str("# TYPE ai_errors_total counter\n");
        let mut error_types: Vec<_> = inner.errors_by_type.iter().collect();
        error_types.sort_by_key(|(k, _)| k.as_str());
        for (category, count) in error_types {
            out.push_str(&format!(
                "ai_errors_total{{type=\"{}\"}} {}\n",
                escape_label_value(category),
                count
            ));
        }

        out.push_str("# HELP ai_latency_seconds Average call latency per operation\n");
        out.push_str("# TYPE ai_latency_seconds gauge\n");
        let mut operations: Vec<_> = inner.per_operation.iter().collect();
        operations.sort_by_key(|(op, _)| **op);
        for (op, stats) in &operations {
            let avg = if stats.calls == 0 {
                0.0
            } else {
                stats.latency_total.as_secs_f64() / stats.calls as f64
            };
            out.push_str(&format!(
                "ai_latency_seconds{{operation=\"{}\"}} {avg}\n",
                escape_label_value(op)
            ));
        }

        out.push_str("# HELP ai_cache_hits_total Calls served from the cache\n");
        out.push_str("# TYPE ai_cache_hits_total counter\n");
        out.push_str(&format!("ai_cache_hits_total {}\n", inner.cache_hits_total));

        out.push_str("# HELP ai_confidence_avg Mean reported confidence across calls\n");
        out.push_str("# TYPE ai_confidence_avg gauge\n");
        let confidence_avg = if inner.confidence_count == 0 {
            0.0
        } else {
            inner.confidence_sum / inner.confidence_count as f64
        };
        out.push_str(&format!("ai_confidence_avg {confidence_avg}\n"));

        out.push_str("# HELP ai_operation_calls_total Calls per operation\n");
        out.push_str("# TYPE ai_operation_calls_total counter\n");
        for (op, stats) in &operations {
            out.push_str(&format!(
                "ai_operation_calls_total{{operation=\"{}\"}} {}\n",
                escape_label_value(op),
                stats.calls
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(operation: &'static str) -> MetricRow {
        MetricRow {
            operation,
            model: "stub-model".to_string(),
            latency: Duration::from_millis(200),
            input_tokens: 100,
            output_tokens: 50,
            cost: dec!(0.01),
            confidence: Some(0.9),
            cache_hit: false,
            error_category: None,
        }
    }

    #[test]
    fn record_aggregates_totals() {
        let metrics = AiMetrics::new();
        metrics.record(&row("map_columns"));
        metrics.record(&row("map_columns"));
        metrics.record(&MetricRow {
            cache_hit: true,
            cost: Decimal::ZERO,
            input_tokens: 0,
            output_tokens: 0,
            ..row("analyze_paste")
        });

        assert_eq!(metrics.calls_total(), 3);
        assert_eq!(metrics.cache_hits_total(), 1);
        assert_eq!(metrics.cost_total(), dec!(0.02));
    }

    #[test]
    fn errors_counted_by_type() {
        let metrics = AiMetrics::new();
        metrics.record(&MetricRow {
            error_category: Some("transient"),
            confidence: None,
            ..row("map_columns")
        });
        metrics.record(&MetricRow {
            error_category: Some("permanent"),
            confidence: None,
            ..row("map_columns")
        });

        let text = metrics.render_prometheus();
        assert!(text.contains("ai_errors_total{type=\"transient\"} 1"));
        assert!(text.contains("ai_errors_total{type=\"permanent\"} 1"));
    }

    #[test]
    fn exposition_has_help_and_type_for_every_family() {
        let metrics = AiMetrics::new();
        metrics.record(&row("map_columns"));
        let text = metrics.render_prometheus();
        for family in [
            "ai_calls_total",
            "ai_tokens_input_total",
            "ai_tokens_output_total",
            "ai_cost_usd_total",
            "ai_errors_total",
            "ai_latency_seconds",
            "ai_cache_hits_total",
            "ai_confidence_avg",
            "ai_operation_calls_total",
        ] {
            assert!(text.contains(&format!("# HELP {family} ")), "missing HELP for {family}");
            assert!(text.contains(&format!("# TYPE {family} ")), "missing TYPE for {family}");
        }
    }

    #[test]
    fn per_operation_rows_render() {
        let metrics = AiMetrics::new();
        metrics.record(&row("map_columns"));
        metrics.record(&row("map_columns"));
        let text = metrics.render_prometheus();
        assert!(text.contains("ai_operation_calls_total{operation=\"map_columns\"} 2"));
        assert!(text.contains("ai_latency_seconds{operation=\"map_columns\"} 0.2"));
    }

    #[test]
    fn confidence_average_over_reporting_calls_only() {
        let metrics = AiMetrics::new();
        metrics.record(&MetricRow {
            confidence: Some(0.8),
            ..row("map_columns")
        });
        metrics.record(&MetricRow {
            confidence: None,
            ..row("map_columns")
        });
        metrics.record(&MetricRow {
            confidence: Some(0.6),
            ..row("map_columns")
        });
        let text = metrics.render_prometheus();
        assert!(text.contains("ai_confidence_avg 0.7"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label_value("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
