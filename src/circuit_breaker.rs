// =============================================================================
// Circuit Breaker — three-state failure gate for new-connection attempts
// =============================================================================
//
// States:
//   Closed   — normal operation; successes reset the failure counter.
//   Open     — calls fail fast; after `timeout` elapses, the next call
//              transitions to HalfOpen.
//   HalfOpen — a limited number of trial calls; `success_threshold`
//              consecutive successes closes the circuit, any failure reopens
//              it.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    open_count: u64,
}

/// Point-in-time statistics, suitable for a health-check endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub open_count: u64,
}

/// A three-state circuit breaker guarding a single failure-prone operation
/// (here: creation of a new WebSocket connection).
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    success_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, timeout: Duration, success_threshold: u32) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            timeout,
            success_threshold,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                total_calls: 0,
                total_failures: 0,
                total_successes: 0,
                open_count: 0,
            }),
        }
    }

    /// Default configuration matching the original adapter: 5 consecutive
    /// failures trips the breaker, 60 s cooldown, 3 successes to close.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, 5, Duration::from_secs(60), 3)
    }

    /// Returns `Ok(())` if the call may proceed (Closed, or Open-past-timeout
    /// which transitions to HalfOpen), or `Err(())` if it must fail fast.
    pub fn check(&self) -> Result<(), ()> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(name = %self.name, "circuit breaker half-opening for trial call");
                    Ok(())
                } else {
                    Err(())
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(name = %self.name, "circuit breaker closed after recovery");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        if matches!(inner.state, CircuitState::Closed | CircuitState::HalfOpen)
            && inner.failure_count >= self.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.open_count += 1;
            warn!(
                name = %self.name,
                failure_count = inner.failure_count,
                "circuit breaker opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            open_count: inner.open_count,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60), 2);
        for _ in 0..3 {
            cb.check().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn half_open_requires_consecutive_successes_to_close() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(0), 2);
        cb.check().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Timeout of zero means the very next check transitions to HalfOpen.
        cb.check().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn any_failure_in_half_open_reopens() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(0), 3);
        cb.check().unwrap();
        cb.record_failure();
        cb.check().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_in_closed_state_resets_failure_count() {
        let cb = CircuitBreaker::new("test", 5, Duration::from_secs(60), 3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.state, CircuitState::Closed);
    }
}
