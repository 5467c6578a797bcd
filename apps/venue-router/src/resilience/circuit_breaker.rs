//! Circuit breaker for provider calls.
//!
//! Guards connection attempts and order legs so a failing provider is not
//! hammered.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (N consecutive failures inside the rolling window)
//! OPEN → HALF_OPEN (wait duration elapsed)
//! HALF_OPEN → CLOSED (trial calls succeed)
//! HALF_OPEN → OPEN (a trial call fails)
//! ```
//!
//! # Configuration
//!
//! - `failure_threshold`: Consecutive failures that open the circuit (default: 5)
//! - `failure_window`: Failures older than this are forgotten (default: 60s)
//! - `wait_duration_in_open`: Time to stay open (default: 30s)
//! - `permitted_calls_in_half_open`: Trial calls allowed (default: 1)
//!
//! Time comes from `tokio::time::Instant`, so paused-clock tests drive it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is testing with limited calls.
    HalfOpen,
}

impl CircuitBreakerState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Rolling window for counting failures.
    pub failure_window: Duration,
    /// Duration to stay in `OPEN` state.
    pub wait_duration_in_open: Duration,
    /// Permitted trial calls in `HALF_OPEN` state.
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            wait_duration_in_open: Duration::from_secs(30),
            permitted_calls_in_half_open: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    /// Failure times since the last success, oldest first.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
}

/// Circuit breaker for one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Name for logging.
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                half_open_calls: 0,
                half_open_successes: 0,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock();
        self.check_state_transition(&mut inner);
        inner.state
    }

    /// Ask to make a call.
    ///
    /// Returns false when the circuit is open or the half-open trial budget
    /// is spent. A permitted half-open call consumes one trial slot.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.check_state_transition(&mut inner);
        let permitted = match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => false,
            CircuitBreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.permitted_calls_in_half_open {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        };
        drop(inner);
        if !permitted {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
        }
        permitted
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed => inner.failures.clear(),
            CircuitBreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.permitted_calls_in_half_open {
                    self.transition(&mut inner, CircuitBreakerState::Closed);
                }
            }
            CircuitBreakerState::Open => {
                tracing::debug!(name = %self.name, "Success recorded while circuit is OPEN");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failures.push_back(now);
                while inner
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > self.config.failure_window)
                {
                    inner.failures.pop_front();
                }
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.transition(&mut inner, CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                self.transition(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Open => {
                tracing::warn!(name = %self.name, "Failure recorded while circuit is OPEN");
            }
        }
    }

    /// Time left before an open circuit allows a trial call.
    #[must_use]
    pub fn remaining_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitBreakerState::Open {
            return None;
        }
        inner.opened_at.map(|opened| {
            self.config
                .wait_duration_in_open
                .saturating_sub(opened.elapsed())
        })
    }

    /// Check for the time-based `OPEN` -> `HALF_OPEN` transition.
    fn check_state_transition(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitBreakerState::Open
            && let Some(opened) = inner.opened_at
            && opened.elapsed() >= self.config.wait_duration_in_open
        {
            self.transition(inner, CircuitBreakerState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitBreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            CircuitBreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    name = %self.name,
                    from = %from,
                    to = %to,
                    failures = inner.failures.len(),
                    "Circuit breaker opened"
                );
            }
            CircuitBreakerState::HalfOpen => {
                inner.half_open_calls = 0;
                inner.half_open_successes = 0;
                tracing::info!(name = %self.name, from = %from, to = %to, "Circuit breaker testing");
            }
            CircuitBreakerState::Closed => {
                inner.failures.clear();
                inner.opened_at = None;
                tracing::info!(name = %self.name, from = %from, to = %to, "Circuit breaker closed");
            }
        }
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_transition(&self.name, to.as_str());
    }

    /// Get metrics for this circuit breaker.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit breaker open.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitBreakerState::Open);
    }

    /// Force the circuit breaker closed.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitBreakerState::Closed);
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Total recorded calls.
    pub total_calls: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub total_rejections: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            wait_duration_in_open: Duration::from_secs(10),
            permitted_calls_in_half_open: 1,
        }
    }

    #[test]
    fn initial_state_is_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn consecutive_failures_open_circuit() {
        let breaker = CircuitBreaker::new("test", config(3));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.try_acquire());
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[test]
    fn success_resets_failure_run() {
        let breaker = CircuitBreaker::new("test", config(3));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_are_forgotten() {
        let breaker = CircuitBreaker::new("test", config(2));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_closes_on_success() {
        let breaker = CircuitBreaker::new("test", config(1));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.remaining_open().is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new("test", config(1));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.metrics().state_transitions, 3);
    }

    #[test]
    fn force_open_and_close() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        breaker.force_close();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }
}
