//! Circuit breaker shielding the upstream provider on sustained failure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Ceiling on the exponential backoff between recovery probes.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Base wait before the first recovery probe.
    pub reset_timeout: Duration,
    /// Probes admitted while half-open.
    pub half_open_max: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max: 1,
        }
    }
}

/// Breaker state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    /// Consecutive open periods; drives the exponential backoff. Increments
    /// only when a probe fails, not on the first closed-to-open trip, so a
    /// single burst of failures does not inflate the wait.
    consecutive_open: u32,
    last_failure_at: Option<Instant>,
    half_open_count: u32,
}

/// Thread-safe circuit breaker with exponential probe backoff.
///
/// Backoff after `k` consecutive open periods is
/// `min(reset_timeout * 2^k, 5 min)`.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                consecutive_open: 0,
                last_failure_at: None,
                half_open_count: 0,
            }),
        }
    }

    fn backoff(&self, consecutive_open: u32) -> Duration {
        let factor = 2u32.checked_pow(consecutive_open).unwrap_or(u32::MAX);
        self.config
            .reset_timeout
            .checked_mul(factor)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }

    /// Apply the time-based open-to-half-open transition. Caller holds the
    /// lock.
    fn advance(&self, inner: &mut Inner, now: Instant) {
        if inner.state == CircuitState::Open {
            let waited_out = inner
                .last_failure_at
                .is_none_or(|at| now.duration_since(at) > self.backoff(inner.consecutive_open));
            if waited_out {
                tracing::info!("circuit breaker half-open, admitting recovery probe");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_count = 0;
            }
        }
    }

    /// Whether a request may proceed. In half-open state at most
    /// `half_open_max` callers are admitted.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner, now);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_count < self.config.half_open_max {
                    inner.half_open_count += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner, now);
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.failures,
                        "circuit breaker open after repeated failures"
                    );
                    inner.state = CircuitState::Open;
                    inner.last_failure_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("recovery probe failed, circuit breaker re-open");
                inner.state = CircuitState::Open;
                inner.consecutive_open += 1;
                inner.last_failure_at = Some(now);
            }
            CircuitState::Open => {
                // A straggler from before the trip; nothing to update.
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner, now);
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!("recovery probe succeeded, circuit breaker closed");
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.consecutive_open = 0;
                inner.half_open_count = 0;
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, applying the time-based transition first.
    pub fn state(&self) -> CircuitState {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner, now);
        inner.state
    }

    /// Time until the next probe is admitted; zero when not open.
    pub fn retry_in(&self) -> Duration {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut inner, now);
        if inner.state != CircuitState::Open {
            return Duration::ZERO;
        }
        let backoff = self.backoff(inner.consecutive_open);
        match inner.last_failure_at {
            Some(at) => backoff.saturating_sub(now.duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(50),
            half_open_max: 1,
        })
    }

    #[test]
    fn closed_allows() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_failure_threshold() {
        let breaker = fast_breaker(3);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_closed_failure_count() {
        let breaker = fast_breaker(2);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_bounded_probes() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            half_open_max: 2,
        });
        breaker.record_failure();
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        assert!(breaker.allow());
        assert!(!breaker.allow(), "only half_open_max probes admitted");
    }

    #[test]
    fn probe_success_closes() {
        let breaker = fast_breaker(1);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
    }

    /// Exponential backoff walkthrough: threshold 2, reset 50ms, probe
    /// failure doubles the wait.
    #[test]
    fn probe_failure_doubles_backoff() {
        let breaker = fast_breaker(2);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // First backoff is the 50ms base.
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow(), "probe admitted after base backoff");
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // consecutive_open = 1 doubles the wait to 100ms: still open at
        // 60ms, half-open at 110ms.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn first_trip_does_not_inflate_backoff() {
        let breaker = fast_breaker(2);
        breaker.record_failure();
        breaker.record_failure();
        // Base backoff applies: half-open well before the doubled wait.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn backoff_is_capped() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            half_open_max: 1,
        });
        assert_eq!(breaker.backoff(0), Duration::from_secs(30));
        assert_eq!(breaker.backoff(1), Duration::from_secs(60));
        assert_eq!(breaker.backoff(10), MAX_BACKOFF);
        assert_eq!(breaker.backoff(40), MAX_BACKOFF, "no overflow at high counts");
    }

    #[test]
    fn retry_in_reports_remaining_wait() {
        let breaker = fast_breaker(1);
        assert_eq!(breaker.retry_in(), Duration::ZERO);
        breaker.record_failure();
        let remaining = breaker.retry_in();
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_millis(50));
    }
}
