//! Period-bounded spend tracking with threshold alerts.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Budget configuration.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Spend cap per period. Zero disables the manager entirely.
    pub daily_budget: Decimal,
    /// Fraction of the budget at which the warning alert fires.
    pub warning_threshold: f64,
    /// Fraction at which further requests are rejected.
    pub hard_stop_threshold: f64,
    /// Period length; state resets when it elapses.
    pub reset_interval: Duration,
    /// Optional JSON file the state is persisted to on every spend.
    pub persist_path: Option<PathBuf>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget: Decimal::ZERO,
            warning_threshold: 0.80,
            hard_stop_threshold: 1.00,
            reset_interval: Duration::from_secs(24 * 60 * 60),
            persist_path: None,
        }
    }
}

/// Severity of a budget alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    HardStop,
}

/// Delivered to the injected alert handler, at most once per level per
/// period.
#[derive(Debug, Clone)]
pub struct BudgetAlert {
    pub level: AlertLevel,
    pub spent: Decimal,
    pub budget: Decimal,
    pub pct: f64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

type AlertHandler = Box<dyn Fn(&BudgetAlert) + Send + Sync>;

struct State {
    spent: Decimal,
    period_start: DateTime<Utc>,
    warning_fired: bool,
    hard_stop_fired: bool,
}

/// On-disk form of the budget state. Spend round-trips through `f64` for
/// the documented JSON layout.
#[derive(Serialize, Deserialize)]
struct PersistedState {
    spent: f64,
    #[serde(rename = "periodStart")]
    period_start: DateTime<Utc>,
}

/// Tracks spend against a per-period cap.
///
/// The lock covers in-memory state only; alert delivery and file
/// persistence happen after it is released.
pub struct BudgetManager {
    config: BudgetConfig,
    state: Mutex<State>,
    on_alert: Option<AlertHandler>,
}

impl BudgetManager {
    /// Create a manager, restoring persisted state when a path is
    /// configured. A file from an expired period (or an unreadable one) is
    /// discarded.
    pub fn new(config: BudgetConfig) -> Self {
        let state = config
            .persist_path
            .as_deref()
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                    Ok(persisted) => Some(persisted),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "discarding unparseable budget state");
                        None
                    }
                },
                Err(_) => None,
            })
            .filter(|persisted| {
                let age = Utc::now().signed_duration_since(persisted.period_start);
                age.to_std().is_ok_and(|age| age <= config.reset_interval)
            })
            .map(|persisted| State {
                spent: Decimal::from_f64(persisted.spent).unwrap_or(Decimal::ZERO),
                period_start: persisted.period_start,
                warning_fired: false,
                hard_stop_fired: false,
            })
            .unwrap_or_else(|| State {
                spent: Decimal::ZERO,
                period_start: Utc::now(),
                warning_fired: false,
                hard_stop_fired: false,
            });

        Self {
            config,
            state: Mutex::new(state),
            on_alert: None,
        }
    }

    /// Install the alert handler. Call before sharing the manager.
    pub fn with_alert_handler(mut self, handler: impl Fn(&BudgetAlert) + Send + Sync + 'static) -> Self {
        self.on_alert = Some(Box::new(handler));
        self
    }

    fn period_expired(&self, state: &State, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(state.period_start)
            .to_std()
            .is_ok_and(|age| age > self.config.reset_interval)
    }

    /// Record spend and fire threshold alerts.
    ///
    /// Crossing the hard-stop threshold fires only the hard-stop alert and
    /// suppresses a later warning for the period.
    pub fn record_spend(&self, amount: Decimal) {
        let now = Utc::now();
        let mut alert = None;
        let snapshot;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if self.period_expired(&state, now) {
                state.spent = Decimal::ZERO;
                state.warning_fired = false;
                state.hard_stop_fired = false;
                state.period_start = now;
            }
            state.spent += amount;

            if self.config.daily_budget > Decimal::ZERO {
                let pct = (state.spent / self.config.daily_budget)
                    .to_f64()
                    .unwrap_or(0.0);
                if pct >= self.config.hard_stop_threshold && !state.hard_stop_fired {
                    state.hard_stop_fired = true;
                    // A hard stop covers the warning for this period too.
                    state.warning_fired = true;
                    alert = Some(BudgetAlert {
                        level: AlertLevel::HardStop,
                        spent: state.spent,
                        budget: self.config.daily_budget,
                        pct,
                        timestamp: now,
                        message: format!(
                            "budget hard stop: spent {} of {}",
                            state.spent, self.config.daily_budget
                        ),
                    });
                } else if pct >= self.config.warning_threshold && !state.warning_fired {
                    state.warning_fired = true;
                    alert = Some(BudgetAlert {
                        level: AlertLevel::Warning,
                        spent: state.spent,
                        budget: self.config.daily_budget,
                        pct,
                        timestamp: now,
                        message: format!(
                            "budget warning: spent {} of {}",
                            state.spent, self.config.daily_budget
                        ),
                    });
                }
            }

            snapshot = PersistedState {
                spent: state.spent.to_f64().unwrap_or(0.0),
                period_start: state.period_start,
            };
        }

        if let Some(alert) = alert {
            tracing::warn!(
                level = ?alert.level,
                spent = %alert.spent,
                budget = %alert.budget,
                "budget alert"
            );
            if let Some(handler) = &self.on_alert {
                handler(&alert);
            }
        }

        if let Some(path) = self.config.persist_path.as_deref() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            match serde_json::to_vec(&snapshot) {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(path, bytes) {
                        tracing::warn!(path = %path.display(), error = %e, "budget persistence failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "budget state serialization failed"),
            }
        }
    }

    /// Whether another request is allowed, and how much budget remains.
    ///
    /// A disabled manager (zero budget) always allows. An expired period
    /// allows with the full budget remaining.
    pub fn check(&self) -> (bool, Decimal) {
        if self.config.daily_budget <= Decimal::ZERO {
            return (true, Decimal::ZERO);
        }
        let now = Utc::now();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.period_expired(&state, now) {
            return (true, self.config.daily_budget);
        }
        let pct = (state.spent / self.config.daily_budget)
            .to_f64()
            .unwrap_or(0.0);
        let remaining = (self.config.daily_budget - state.spent).max(Decimal::ZERO);
        (pct < self.config.hard_stop_threshold, remaining)
    }

    /// Spend so far in the current period.
    pub fn spent(&self) -> Decimal {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).spent
    }

    /// The configured per-period cap.
    pub fn daily_budget(&self) -> Decimal {
        self.config.daily_budget
    }
}
