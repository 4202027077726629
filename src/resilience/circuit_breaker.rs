//! Per-provider circuit breaker (C6), state machine per spec §4.4.
//!
//! Structured after the teacher pack's `MitigationController`: a
//! `parking_lot::RwLock`-guarded map keyed by name, `entry().or_default()`
//! on every touch, and three operations (`record_success`,
//! `record_failure`, `is_open`) that readers/writers call around each
//! provider invocation. The registry is injected rather than a true
//! global (§9 "Global state") so tests can instantiate isolated instances.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive monitored failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker stays open before allowing a probe.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes required to close.
    pub half_open_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_successes: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    opened_count: u64,
    total_calls: u64,
    total_failures: u64,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure: None,
            opened_at: None,
            opened_count: 0,
            total_calls: 0,
            total_failures: 0,
        }
    }
}

/// Snapshot surfaced to operators (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_rate: f64,
    pub total_calls: u64,
    pub opened_count: u64,
    pub last_failure: Option<Instant>,
}

impl BreakerStats {
    /// Derived health score (§11): 100 scaled by failure rate when closed,
    /// 50 when half-open (a probe is in flight, outcome unknown), 0 when
    /// open.
    #[must_use]
    pub fn health_score(&self) -> u8 {
        match self.state {
            CircuitState::Open => 0,
            CircuitState::HalfOpen => 50,
            CircuitState::Closed => {
                let penalty = (self.failure_rate * 100.0).clamp(0.0, 100.0);
                (100.0 - penalty) as u8
            }
        }
    }
}

/// Process-wide (but injectable) per-provider breaker table.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Breaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// `true` if a call for `provider` should be rejected with
    /// `CircuitOpen` without reaching the provider. As a side effect,
    /// transitions an open breaker whose recovery timeout has elapsed into
    /// `HalfOpen`.
    pub fn is_open(&self, provider: &str) -> bool {
        let mut breakers = self.breakers.write();
        let cb = breakers.entry(provider.to_string()).or_default();
        if cb.state == CircuitState::Open {
            if let Some(opened_at) = cb.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    cb.state = CircuitState::HalfOpen;
                    cb.half_open_successes = 0;
                    return false;
                }
            }
            return true;
        }
        false
    }

    pub fn record_success(&self, provider: &str) {
        let mut breakers = self.breakers.write();
        let cb = breakers.entry(provider.to_string()).or_default();
        cb.total_calls += 1;
        match cb.state {
            CircuitState::HalfOpen => {
                cb.half_open_successes += 1;
                if cb.half_open_successes >= self.config.half_open_successes {
                    cb.state = CircuitState::Closed;
                    cb.consecutive_failures = 0;
                    cb.half_open_successes = 0;
                }
            }
            CircuitState::Closed => {
                cb.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, provider: &str) {
        let mut breakers = self.breakers.write();
        let cb = breakers.entry(provider.to_string()).or_default();
        cb.total_calls += 1;
        cb.total_failures += 1;
        cb.last_failure = Some(Instant::now());

        match cb.state {
            CircuitState::HalfOpen => {
                cb.state = CircuitState::Open;
                cb.opened_at = Some(Instant::now());
                cb.opened_count += 1;
                cb.half_open_successes = 0;
            }
            CircuitState::Closed => {
                cb.consecutive_failures += 1;
                if cb.consecutive_failures >= self.config.failure_threshold {
                    cb.state = CircuitState::Open;
                    cb.opened_at = Some(Instant::now());
                    cb.opened_count += 1;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Feeds an outcome's `ErrorKind` through the breaker, using the
    /// monitored-failure classification from §7 — auth/validation/not-found
    /// never advance `consecutiveFailures`.
    pub fn record_outcome(&self, provider: &str, kind: Option<ErrorKind>) {
        match kind {
            None => self.record_success(provider),
            Some(k) if k.is_monitored_by_breaker() => self.record_failure(provider),
            Some(_) => {}
        }
    }

    #[must_use]
    pub fn stats(&self, provider: &str) -> BreakerStats {
        let breakers = self.breakers.read();
        let cb = breakers.get(provider).cloned().unwrap_or_default();
        let failure_rate = if cb.total_calls == 0 {
            0.0
        } else {
            cb.total_failures as f64 / cb.total_calls as f64
        };
        BreakerStats {
            state: cb.state,
            failure_rate,
            total_calls: cb.total_calls,
            opened_count: cb.opened_count,
            last_failure: cb.last_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(20),
            half_open_successes: 2,
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let reg = fast_registry();
        reg.record_failure("p");
        reg.record_failure("p");
        assert!(!reg.is_open("p"));
        reg.record_failure("p");
        assert!(reg.is_open("p"));
    }

    #[test]
    fn transitions_to_half_open_after_timeout() {
        let reg = fast_registry();
        for _ in 0..3 {
            reg.record_failure("p");
        }
        assert!(reg.is_open("p"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!reg.is_open("p"));
        assert_eq!(reg.stats("p").state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_k_successes_any_failure_reopens() {
        let reg = fast_registry();
        for _ in 0..3 {
            reg.record_failure("p");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(!reg.is_open("p"));
        reg.record_success("p");
        assert_eq!(reg.stats("p").state, CircuitState::HalfOpen);
        reg.record_success("p");
        assert_eq!(reg.stats("p").state, CircuitState::Closed);

        // Re-open via half-open failure.
        for _ in 0..3 {
            reg.record_failure("p");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(!reg.is_open("p"));
        reg.record_failure("p");
        assert_eq!(reg.stats("p").state, CircuitState::Open);
    }

    #[test]
    fn non_monitored_kinds_do_not_advance_failures() {
        let reg = fast_registry();
        reg.record_outcome("p", Some(ErrorKind::Authentication));
        reg.record_outcome("p", Some(ErrorKind::DataNotFound));
        assert!(!reg.is_open("p"));
        assert_eq!(reg.stats("p").total_calls, 0);
    }

    #[test]
    fn health_score_degrades_with_failure_rate() {
        let reg = fast_registry();
        reg.record_success("p");
        assert_eq!(reg.stats("p").health_score(), 100);
        reg.record_failure("p");
        let score = reg.stats("p").health_score();
        assert!(score < 100);
    }
}
