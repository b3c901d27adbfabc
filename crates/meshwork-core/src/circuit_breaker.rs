//! # Circuit Breaker
//!
//! Per-target failure tracker with CLOSED / OPEN / HALF_OPEN transitions.
//!
//! ## State Machine
//!
//! ```text
//!            n consecutive failures
//!   CLOSED ─────────────────────────► OPEN
//!     ▲                                 │ timeout elapsed since last failure
//!     │ success                         ▼
//!     └──────────────────────────── HALF_OPEN
//!                                       │ failure
//!                                       └──────► OPEN (timer restarts)
//! ```
//!
//! One breaker governs one call target, named by an opaque key. The mesh
//! keys breakers by instance id and the gateway by service name; both use
//! this type, each with its own instances. Every breaker carries its own
//! mutex so concurrent callers cannot under- or over-count failures.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::primitives::{DEFAULT_BREAKER_TIMEOUT, DEFAULT_FAILURE_THRESHOLD};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Normal operation, calls flow through.
    Closed,
    /// Tripped, calls fail fast without reaching the target.
    Open,
    /// Probing whether the target has recovered.
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits after the last failure before probing.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: DEFAULT_BREAKER_TIMEOUT,
        }
    }
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub failure_count: u32,
    /// Milliseconds since the last recorded failure, if any.
    pub since_last_failure_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// A lock-guarded circuit breaker for one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// The opaque target key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned breaker still holds valid counters.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call may be attempted now.
    pub fn call_allowed(&self) -> bool {
        self.call_allowed_at(Instant::now())
    }

    /// Whether a call may be attempted at `now`.
    ///
    /// An OPEN breaker moves to HALF_OPEN (and admits the call) once the
    /// timeout has elapsed since the last recorded failure.
    pub fn call_allowed_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.timeout {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call. Any success closes the breaker and resets
    /// the consecutive failure count.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failed call observed at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            BreakerState::HalfOpen => inner.state = BreakerState::Open,
            BreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold.max(1) {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Current state without advancing the timer.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Force the breaker back to CLOSED.
    pub fn reset(&self) {
        self.record_success();
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            since_last_failure_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "target",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(timeout_secs),
            },
        )
    }

    #[test]
    fn opens_on_exactly_nth_failure() {
        let cb = breaker(3, 30);
        let now = Instant::now();

        cb.record_failure_at(now);
        cb.record_failure_at(now);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.call_allowed_at(now));

        cb.record_failure_at(now);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.call_allowed_at(now));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let cb = breaker(3, 30);
        let now = Instant::now();

        cb.record_failure_at(now);
        cb.record_failure_at(now);
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure_at(now);
        cb.record_failure_at(now);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure_at(now);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_only_after_timeout() {
        let cb = breaker(1, 10);
        let t0 = Instant::now();
        cb.record_failure_at(t0);

        assert!(!cb.call_allowed_at(t0 + Duration::from_secs(9)));
        assert_eq!(cb.state(), BreakerState::Open);

        assert!(cb.call_allowed_at(t0 + Duration::from_secs(10)));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes() {
        let cb = breaker(1, 1);
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        assert!(cb.call_allowed_at(t0 + Duration::from_secs(2)));

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_timer() {
        let cb = breaker(2, 10);
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        cb.record_failure_at(t0);
        assert!(cb.call_allowed_at(t0 + Duration::from_secs(10)));

        let t1 = t0 + Duration::from_secs(11);
        cb.record_failure_at(t1);
        assert_eq!(cb.state(), BreakerState::Open);

        // Timer restarted at t1, not t0.
        assert!(!cb.call_allowed_at(t1 + Duration::from_secs(5)));
        assert!(cb.call_allowed_at(t1 + Duration::from_secs(10)));
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let cb = breaker(0, 10);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn snapshot_reports_key_and_state() {
        let cb = breaker(1, 10);
        cb.record_failure();
        let snap = cb.snapshot();
        assert_eq!(snap.key, "target");
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.failure_count, 1);
        assert!(snap.since_last_failure_ms.is_some());
    }

    #[test]
    fn config_serializes_timeout_in_seconds() {
        let config = CircuitBreakerConfig {
            failure_threshold: 4,
            timeout: Duration::from_secs(45),
        };
        let value = serde_json::to_value(config).expect("serialize");
        assert_eq!(value["timeout"], 45);
    }
}
