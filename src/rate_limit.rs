//! Rate Limiter / Circuit Breaker (C8).
//!
//! Shared across the Vision Engine and any other external-call
//! strategy. Both the sliding window and the breaker update via
//! atomic counter bumps behind a single lock, matching the executor's
//! `Arc<Semaphore>` style of guarding a shared resource without
//! threading a lock through every call site.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window admission control: at most `max_calls` calls per `window`.
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Build a limiter admitting at most `max_calls` calls per `window`.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window, calls: Mutex::new(VecDeque::new()) }
    }

    /// Try to admit a call now. Returns `true` if admitted.
    pub fn try_admit(&self) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock();
        while let Some(&front) = calls.front() {
            if now.duration_since(front) > self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
        if calls.len() as u32 >= self.max_calls {
            return false;
        }
        calls.push_back(now);
        true
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls are admitted; consecutive failures are counted.
    Closed,
    /// All calls are rejected until the open duration elapses.
    Open,
    /// The first call after the open duration is a probe.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Closed → Open → HalfOpen → Closed circuit breaker guarding a flaky
/// subsystem (typically OCR).
pub struct CircuitBreaker {
    fail_threshold: u32,
    open_duration: Duration,
    inner: Mutex<BreakerInner>,
}

/// Whether a call was allowed through the breaker, and if so, whether
/// it was a half-open probe (the caller must report its own outcome
/// via [`CircuitBreaker::on_success`]/[`CircuitBreaker::on_failure`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Call allowed, breaker was Closed.
    Allowed,
    /// Call allowed as the single HalfOpen probe.
    Probe,
    /// Call rejected; breaker is Open.
    Rejected,
}

impl CircuitBreaker {
    /// Build a breaker that opens after `fail_threshold` consecutive
    /// failures and stays open for `open_duration`.
    pub fn new(fail_threshold: u32, open_duration: Duration) -> Self {
        Self {
            fail_threshold,
            open_duration,
            inner: Mutex::new(BreakerInner { state: BreakerState::Closed, consecutive_failures: 0, opened_at: None }),
        }
    }

    /// Current state, resolving Open -> HalfOpen if the open duration has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    fn maybe_transition_to_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_duration {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    /// Ask whether a call may proceed right now.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => Admission::Rejected,
            BreakerState::HalfOpen => Admission::Probe,
        }
    }

    /// Report that an admitted call succeeded.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Report that an admitted call failed.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.fail_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_admit());
        assert!(limiter.try_admit());
        assert!(!limiter.try_admit());
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));
        for _ in 0..3 {
            assert_eq!(breaker.admit(), Admission::Allowed);
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.admit(), Admission::Rejected);
    }

    #[test]
    fn test_breaker_half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        assert_eq!(breaker.admit(), Admission::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.admit(), Admission::Probe);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_breaker_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.admit();
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.admit(), Admission::Probe);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
