//! A/B testing of prompt versions: traffic split, running statistics,
//! and promotion into the prompt registry.
//!
//! Promotion is a one-way effect (manager calls registry, never the
//! reverse); when both are locked, the manager's lock is taken first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::error::AiError;
use crate::prompt::PromptRegistry;

/// Lifecycle of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Running,
    Completed,
    Promoted,
}

/// Which prompt variant served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    A,
    B,
}

/// Definition of an A/B test.
#[derive(Debug, Clone)]
pub struct ABTest {
    pub id: String,
    pub operation_id: String,
    pub variant_a_version: String,
    pub variant_b_version: String,
    /// Fraction of traffic routed to variant B, in `(0, 1]`.
    pub traffic_pct: f64,
    /// Samples each variant needs before the comparison is significant.
    pub min_samples: u64,
}

#[derive(Debug, Clone, Default)]
struct VariantStats {
    samples: u64,
    confidence_sum: f64,
    latency_ms_sum: f64,
    cost_sum: Decimal,
    errors: u64,
}

impl VariantStats {
    fn averages(&self) -> VariantAverages {
        let n = self.samples.max(1) as f64;
        VariantAverages {
            samples: self.samples,
            avg_confidence: self.confidence_sum / n,
            avg_latency_ms: self.latency_ms_sum / n,
            avg_cost: if self.samples == 0 {
                Decimal::ZERO
            } else {
                self.cost_sum / Decimal::from(self.samples)
            },
            errors: self.errors,
        }
    }
}

/// Per-variant averages in a comparison.
#[derive(Debug, Clone)]
pub struct VariantAverages {
    pub samples: u64,
    pub avg_confidence: f64,
    pub avg_latency_ms: f64,
    pub avg_cost: Decimal,
    pub errors: u64,
}

/// Side-by-side comparison of the two variants.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub variant_a: VariantAverages,
    pub variant_b: VariantAverages,
    /// B minus A.
    pub confidence_delta: f64,
    pub latency_delta_ms: f64,
    pub cost_delta: Decimal,
    pub significant: bool,
    pub should_promote: bool,
}

struct TestState {
    test: ABTest,
    status: TestStatus,
    stats_a: VariantStats,
    stats_b: VariantStats,
}

struct Inner {
    tests: HashMap<String, TestState>,
    /// RNG lives under the same lock; variant selection mutates it, which
    /// is why `select_variant` takes the write lock.
    rng: StdRng,
}

/// The variant chosen for one call.
#[derive(Debug, Clone)]
pub struct Selection {
    pub test_id: String,
    pub variant: Variant,
    pub version: String,
}

/// Manages running A/B tests.
pub struct AbTestManager {
    inner: RwLock<Inner>,
    registry: Option<Arc<PromptRegistry>>,
}

impl AbTestManager {
    pub fn new(registry: Option<Arc<PromptRegistry>>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                tests: HashMap::new(),
                rng: StdRng::from_entropy(),
            }),
            registry,
        }
    }

    /// Deterministic RNG for tests.
    pub fn with_rng_seed(registry: Option<Arc<PromptRegistry>>, seed: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                tests: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
            }),
            registry,
        }
    }

    /// Register a new test. Rejects duplicate ids and a traffic fraction
    /// outside `(0, 1]`.
    pub fn create_test(&self, test: ABTest) -> Result<(), AiError> {
        if !(test.traffic_pct > 0.0 && test.traffic_pct <= 1.0) {
            return Err(AiError::InvalidOutput {
                reason: format!("traffic_pct {} outside (0, 1]", test.traffic_pct),
            });
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.tests.contains_key(&test.id) {
            return Err(AiError::InvalidOutput {
                reason: format!("duplicate test id {:?}", test.id),
            });
        }
        inner.tests.insert(
            test.id.clone(),
            TestState {
                test,
                status: TestStatus::Running,
                stats_a: VariantStats::default(),
                stats_b: VariantStats::default(),
            },
        );
        Ok(())
    }

    /// Pick a variant for one call of `operation_id`.
    ///
    /// Returns `None` when no test is running for the operation; variant B
    /// is chosen with probability `traffic_pct`.
    pub fn select_variant(&self, operation_id: &str) -> Option<Selection> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let (test_id, traffic_pct, a_version, b_version) = inner
            .tests
            .values()
            .find(|state| {
                state.status == TestStatus::Running && state.test.operation_id == operation_id
            })
            .map(|state| {
                (
                    state.test.id.clone(),
                    state.test.traffic_pct,
                    state.test.variant_a_version.clone(),
                    state.test.variant_b_version.clone(),
                )
            })?;

        let roll: f64 = inner.rng.r#gen();
        Some(if roll < traffic_pct {
            Selection {
                test_id,
                variant: Variant::B,
                version: b_version,
            }
        } else {
            Selection {
                test_id,
                variant: Variant::A,
                version: a_version,
            }
        })
    }

    /// Record the outcome of one call served by `variant`.
    pub fn record_result(
        &self,
        test_id: &str,
        variant: Variant,
        confidence: f64,
        latency_ms: f64,
        cost: Decimal,
        has_error: bool,
    ) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(state) = inner.tests.get_mut(test_id) else {
            tracing::warn!(test_id = %test_id, "result recorded for unknown A/B test");
            return;
        };
        let stats = match variant {
            Variant::A => &mut state.stats_a,
            Variant::B => &mut state.stats_b,
        };
        stats.samples += 1;
        stats.confidence_sum += confidence;
        stats.latency_ms_sum += latency_ms;
        stats.cost_sum += cost;
        if has_error {
            stats.errors += 1;
        }
    }

    /// Compare the variants of `test_id`.
    pub fn comparison(&self, test_id: &str) -> Option<Comparison> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let state = inner.tests.get(test_id)?;
        let a = state.stats_a.averages();
        let b = state.stats_b.averages();
        let significant = state.stats_a.samples >= state.test.min_samples
            && state.stats_b.samples >= state.test.min_samples;
        let should_promote =
            significant && b.avg_confidence > a.avg_confidence && b.avg_cost < a.avg_cost;
        Some(Comparison {
            confidence_delta: b.avg_confidence - a.avg_confidence,
            latency_delta_ms: b.avg_latency_ms - a.avg_latency_ms,
            cost_delta: b.avg_cost - a.avg_cost,
            significant,
            should_promote,
            variant_a: a,
            variant_b: b,
        })
    }

    /// Mark the test promoted and pin the registry to variant B's version.
    pub fn promote_variant(&self, test_id: &str) -> Result<(), AiError> {
        let (operation_id, b_version) = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let state = inner.tests.get_mut(test_id).ok_or_else(|| AiError::InvalidOutput {
                reason: format!("unknown test id {:?}", test_id),
            })?;
            state.status = TestStatus::Promoted;
            (
                state.test.operation_id.clone(),
                state.test.variant_b_version.clone(),
            )
        };
        if let Some(registry) = &self.registry {
            registry.set_override(&operation_id, &b_version);
            tracing::info!(
                test_id = %test_id,
                operation = %operation_id,
                version = %b_version,
                "A/B variant promoted, registry override installed"
            );
        }
        Ok(())
    }

    /// Stop a test without promoting it.
    pub fn complete_test(&self, test_id: &str) -> Result<(), AiError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let state = inner.tests.get_mut(test_id).ok_or_else(|| AiError::InvalidOutput {
            reason: format!("unknown test id {:?}", test_id),
        })?;
        state.status = TestStatus::Completed;
        Ok(())
    }

    /// Status of a test, if it exists.
    pub fn status(&self, test_id: &str) -> Option<TestStatus> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.tests.get(test_id).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal_macros::dec;

    fn test_def(id: &str, traffic_pct: f64) -> ABTest {
        ABTest {
            id: id.to_string(),
            operation_id: "map_columns".to_string(),
            variant_a_version: "v1".to_string(),
            variant_b_version: "v2".to_string(),
            traffic_pct,
            min_samples: 10,
        }
    }

    #[test]
    fn duplicate_id_rejected() {
        let manager = AbTestManager::new(None);
        manager.create_test(test_def("t1", 0.5)).unwrap();
        assert!(manager.create_test(test_def("t1", 0.5)).is_err());
    }

    #[test]
    fn invalid_traffic_pct_rejected() {
        let manager = AbTestManager::new(None);
        assert!(manager.create_test(test_def("t1", 0.0)).is_err());
        assert!(manager.create_test(test_def("t2", 1.5)).is_err());
        assert!(manager.create_test(test_def("t3", f64::NAN)).is_err());
    }

    #[test]
    fn no_running_test_returns_none() {
        let manager = AbTestManager::new(None);
        assert!(manager.select_variant("map_columns").is_none());
    }

    #[test]
    fn traffic_split_matches_configured_fraction() {
        let manager = AbTestManager::with_rng_seed(None, 42);
        manager
            .create_test(ABTest {
                min_samples: 100,
                ..test_def("t1", 0.30)
            })
            .unwrap();

        let mut b_count = 0usize;
        for _ in 0..1000 {
            let selection = manager.select_variant("map_columns").unwrap();
            if selection.variant == Variant::B {
                b_count += 1;
            }
        }
        let fraction = b_count as f64 / 1000.0;
        assert!(
            (0.25..=0.35).contains(&fraction),
            "B fraction {fraction} outside [0.25, 0.35]"
        );
    }

    #[test]
    fn selection_carries_variant_version() {
        let manager = AbTestManager::with_rng_seed(None, 7);
        manager.create_test(test_def("t1", 0.5)).unwrap();
        for _ in 0..20 {
            let selection = manager.select_variant("map_columns").unwrap();
            match selection.variant {
                Variant::A => assert_eq!(selection.version, "v1"),
                Variant::B => assert_eq!(selection.version, "v2"),
            }
            assert_eq!(selection.test_id, "t1");
        }
    }

    #[test]
    fn comparison_deltas_and_significance() {
        let manager = AbTestManager::new(None);
        manager
            .create_test(ABTest {
                min_samples: 2,
                ..test_def("t1", 0.5)
            })
            .unwrap();

        manager.record_result("t1", Variant::A, 0.6, 100.0, dec!(0.02), false);
        manager.record_result("t1", Variant::A, 0.7, 120.0, dec!(0.02), false);
        manager.record_result("t1", Variant::B, 0.8, 90.0, dec!(0.01), false);

        let cmp = manager.comparison("t1").unwrap();
        assert!(!cmp.significant, "B is below min_samples");

        manager.record_result("t1", Variant::B, 0.9, 80.0, dec!(0.01), true);
        let cmp = manager.comparison("t1").unwrap();
        assert!(cmp.significant);
        assert!(cmp.should_promote, "B wins on confidence and cost");
        assert!((cmp.confidence_delta - 0.2).abs() < 1e-9);
        assert!(cmp.cost_delta < Decimal::ZERO);
        assert_eq!(cmp.variant_b.errors, 1);
    }

    #[test]
    fn cheaper_but_weaker_variant_is_not_promoted() {
        let manager = AbTestManager::new(None);
        manager
            .create_test(ABTest {
                min_samples: 1,
                ..test_def("t1", 0.5)
            })
            .unwrap();
        manager.record_result("t1", Variant::A, 0.9, 100.0, dec!(0.02), false);
        manager.record_result("t1", Variant::B, 0.5, 100.0, dec!(0.01), false);
        let cmp = manager.comparison("t1").unwrap();
        assert!(cmp.significant);
        assert!(!cmp.should_promote);
    }

    #[test]
    fn promote_installs_registry_override_and_stops_test() {
        let registry = Arc::new(PromptRegistry::new());
        registry.register("map_columns", "v1", "one");
        registry.register("map_columns", "v2", "two");
        // Latest would be v2 anyway; make A the latest to prove the
        // override takes effect.
        registry.register("map_columns", "v1", "one again");

        let manager = AbTestManager::new(Some(registry.clone()));
        manager.create_test(test_def("t1", 0.5)).unwrap();
        manager.promote_variant("t1").unwrap();

        assert_eq!(manager.status("t1"), Some(TestStatus::Promoted));
        assert!(manager.select_variant("map_columns").is_none());
        assert_eq!(registry.get("map_columns").unwrap().version, "v2");
    }

    #[test]
    fn completed_test_stops_selecting() {
        let manager = AbTestManager::new(None);
        manager.create_test(test_def("t1", 0.5)).unwrap();
        manager.complete_test("t1").unwrap();
        assert!(manager.select_variant("map_columns").is_none());
    }

    #[test]
    fn averages_use_to_f64_free_paths() {
        // Guard against accidental Decimal/f64 mixups in averages.
        let stats = VariantStats {
            samples: 2,
            confidence_sum: 1.5,
            latency_ms_sum: 300.0,
            cost_sum: dec!(0.04),
            errors: 0,
        };
        let avg = stats.averages();
        assert_eq!(avg.avg_cost, dec!(0.02));
        assert!((avg.avg_confidence - 0.75).abs() < 1e-9);
        assert!(avg.avg_cost.to_f64().unwrap() > 0.0);
    }
}
