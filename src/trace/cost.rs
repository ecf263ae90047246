//! Per-model pricing table and per-operation cost accounting.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Rates are USD per million tokens `(input, output)`.
type Rate = (Decimal, Decimal);

/// Pricing table, read-only after construction.
///
/// Unknown models fall back to a conservative default (roughly gpt-4o
/// pricing) so cost tracking never silently reports zero for a paid model.
pub struct CostCalculator {
    table: HashMap<String, Rate>,
    default_rate: Rate,
}

impl CostCalculator {
    /// Build a calculator with the built-in pricing table.
    pub fn with_default_pricing() -> Self {
        let mut table = HashMap::new();
        let mut add = |models: &[&str], rate: Rate| {
            for model in models {
                table.insert(model.to_string(), rate);
            }
        };

        // OpenAI -- USD per million tokens
        add(&["gpt-4o", "gpt-4o-2024-11-20"], (dec!(2.50), dec!(10.00)));
        add(&["gpt-4o-mini", "gpt-4o-mini-2024-07-18"], (dec!(0.15), dec!(0.60)));
        add(&["gpt-4.1", "gpt-4.1-2025-04-14"], (dec!(2.00), dec!(8.00)));
        add(&["gpt-4.1-mini"], (dec!(0.40), dec!(1.60)));

        // Anthropic
        add(
            &["claude-3-5-sonnet-latest", "claude-sonnet-4-20250514"],
            (dec!(3.00), dec!(15.00)),
        );
        add(&["claude-3-5-haiku-latest"], (dec!(0.80), dec!(4.00)));

        Self {
            table,
            default_rate: (dec!(2.50), dec!(10.00)),
        }
    }

    /// Build from an explicit table (tests, non-standard deployments).
    pub fn new(table: HashMap<String, Rate>, default_rate: Rate) -> Self {
        Self {
            table,
            default_rate,
        }
    }

    fn rate(&self, model: &str) -> Rate {
        // Strip a provider prefix (e.g. "openai/gpt-4o" -> "gpt-4o").
        let id = model.rsplit_once('/').map(|(_, name)| name).unwrap_or(model);
        self.table.get(id).copied().unwrap_or(self.default_rate)
    }

    /// Cost in USD for one call.
    pub fn calculate(&self, model: &str, input_tokens: u32, output_tokens: u32) -> Decimal {
        let (input_rate, output_rate) = self.rate(model);
        let million = dec!(1_000_000);
        Decimal::from(input_tokens) * input_rate / million
            + Decimal::from(output_tokens) * output_rate / million
    }
}

/// Accumulates spend per operation.
#[derive(Default)]
pub struct CostTracker {
    per_operation: RwLock<HashMap<String, Decimal>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, operation: &str, cost: Decimal) {
        if cost.is_zero() {
            return;
        }
        let mut map = self.per_operation.write().unwrap_or_else(|e| e.into_inner());
        *map.entry(operation.to_string()).or_insert(Decimal::ZERO) += cost;
    }

    /// Per-operation spend, sorted by operation name.
    pub fn report(&self) -> Vec<(String, Decimal)> {
        let map = self.per_operation.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<_> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn total(&self) -> Decimal {
        let map = self.per_operation.read().unwrap_or_else(|e| e.into_inner());
        map.values().copied().sum()
    }
}
