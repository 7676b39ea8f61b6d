//! Three-state circuit breaker gating order submission (C12, §4.9).

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u64,
    pub timeout: Duration,
    pub success_threshold: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    last_failure_ts: Option<Instant>,
}

/// `reset()` forces `HalfOpen` rather than `Closed` — an operator clearing a
/// trip still wants the next submission probed before trusting the venue.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_ts: None,
            }),
        }
    }

    /// Whether a submission may proceed. Also performs the Open -> HalfOpen
    /// auto-reset check, under the same lock as every other transition.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.last_failure_ts.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    debug!("circuit breaker timeout elapsed, probing with HalfOpen");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!("circuit breaker recovered, closing");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_ts = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!("circuit breaker tripped after {} failures", inner.failure_count);
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("failure during HalfOpen probe, reopening circuit");
                inner.state = CircuitState::Open;
                inner.failure_count = 0;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Forces `HalfOpen`, per §4.9.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::HalfOpen;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u64, timeout_ms: u64, success_threshold: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_millis(timeout_ms),
            success_threshold,
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(config(3, 1000, 2));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn transitions_to_half_open_after_timeout_then_closes_on_successes() {
        let cb = CircuitBreaker::new(config(1, 10, 2));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(config(1, 10, 2));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn reset_forces_half_open_not_closed() {
        let cb = CircuitBreaker::new(config(1, 10_000, 2));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }
}
