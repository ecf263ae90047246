//! Engine configuration, resolved from the environment.
//!
//! Every knob has a default; `resolve()` overlays `SHEETSPEC_*`
//! environment variables. Tests that mutate the process environment hold
//! [`ENV_MUTEX`] so they do not race each other.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::breaker::BreakerConfig;
use crate::budget::BudgetConfig;
use crate::error::ConfigError;
use crate::llm::RetryConfig;

/// Serializes environment mutation across tests.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Read an env var, treating empty values as unset.
pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional_env(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: name.to_string(),
            message: format!("cannot parse {raw:?}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: name.to_string(),
                message: format!("expected a boolean, got {other:?}"),
            }),
        },
        None => Ok(default),
    }
}

/// Cache stack configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// L1 entry capacity.
    pub l1_max_size: usize,
    /// L2 store path; `None` disables the persistent layer.
    pub l2_path: Option<PathBuf>,
    /// L2 row capacity.
    pub l2_max_size: usize,
    /// TTL applied to cached results.
    pub ttl: Duration,
    /// BYOK mode: bypass all cache reads and writes.
    pub disable_cache: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_size: 1000,
            l2_path: None,
            l2_max_size: 10_000,
            ttl: Duration::from_secs(24 * 60 * 60),
            disable_cache: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Model id of the primary provider, used in cache keys and pricing.
    pub primary_model: String,
    pub cache: CacheConfig,
    pub budget: BudgetConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    /// Token cap passed to providers.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o-mini".to_string(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

impl AiConfig {
    /// Defaults overlaid with `SHEETSPEC_*` environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let cache_defaults = defaults.cache;
        let budget_defaults = defaults.budget;

        let cache = CacheConfig {
            l1_max_size: parse_env("SHEETSPEC_CACHE_L1_MAX", cache_defaults.l1_max_size)?,
            l2_path: optional_env("SHEETSPEC_CACHE_DB").map(PathBuf::from),
            l2_max_size: parse_env("SHEETSPEC_CACHE_L2_MAX", cache_defaults.l2_max_size)?,
            ttl: Duration::from_secs(parse_env(
                "SHEETSPEC_CACHE_TTL_SECS",
                cache_defaults.ttl.as_secs(),
            )?),
            disable_cache: parse_bool_env("SHEETSPEC_DISABLE_CACHE", false)?,
        };

        let budget = BudgetConfig {
            daily_budget: parse_env::<Decimal>(
                "SHEETSPEC_DAILY_BUDGET_USD",
                budget_defaults.daily_budget,
            )?,
            persist_path: optional_env("SHEETSPEC_BUDGET_FILE").map(PathBuf::from),
            ..budget_defaults
        };

        Ok(Self {
            primary_model: optional_env("SHEETSPEC_PRIMARY_MODEL")
                .unwrap_or(defaults.primary_model),
            cache,
            budget,
            breaker: defaults.breaker,
            retry: defaults.retry,
            max_tokens: parse_env("SHEETSPEC_MAX_TOKENS", defaults.max_tokens)?,
            temperature: defaults.temperature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_without_env() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        for var in [
            "SHEETSPEC_CACHE_DB",
            "SHEETSPEC_CACHE_L1_MAX",
            "SHEETSPEC_DAILY_BUDGET_USD",
            "SHEETSPEC_DISABLE_CACHE",
        ] {
            unsafe { std::env::remove_var(var) };
        }

        let config = AiConfig::resolve().unwrap();
        assert_eq!(config.cache.l1_max_size, 1000);
        assert!(config.cache.l2_path.is_none());
        assert!(!config.cache.disable_cache);
        assert_eq!(config.budget.daily_budget, Decimal::ZERO);
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var("SHEETSPEC_CACHE_DB", "/tmp/sheetspec/cache.db");
            std::env::set_var("SHEETSPEC_DAILY_BUDGET_USD", "2.50");
            std::env::set_var("SHEETSPEC_DISABLE_CACHE", "true");
        }

        let config = AiConfig::resolve().unwrap();

        unsafe {
            std::env::remove_var("SHEETSPEC_CACHE_DB");
            std::env::remove_var("SHEETSPEC_DAILY_BUDGET_USD");
            std::env::remove_var("SHEETSPEC_DISABLE_CACHE");
        }

        assert_eq!(
            config.cache.l2_path.as_deref(),
            Some(std::path::Path::new("/tmp/sheetspec/cache.db"))
        );
        assert_eq!(config.budget.daily_budget, dec!(2.50));
        assert!(config.cache.disable_cache);
    }

    #[test]
    fn invalid_value_is_an_error() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::set_var("SHEETSPEC_CACHE_L1_MAX", "many") };
        let result = AiConfig::resolve();
        unsafe { std::env::remove_var("SHEETSPEC_CACHE_L1_MAX") };
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn empty_env_value_is_unset() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::set_var("SHEETSPEC_CACHE_DB", "") };
        let config = AiConfig::resolve().unwrap();
        unsafe { std::env::remove_var("SHEETSPEC_CACHE_DB") };
        assert!(config.cache.l2_path.is_none());
    }
}
