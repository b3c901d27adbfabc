//! # Property-Based Tests
//!
//! Invariants of the circuit breaker, the sliding-window limiter and the
//! route table, checked with proptest.

use meshwork_core::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, RouteConfig, RouteMatch, RouteTable,
    SlidingWindowLimiter, weighted_index,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
    CircuitBreaker::new(
        "target",
        CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_secs(timeout_secs),
        },
    )
}

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

proptest! {
    /// The breaker opens on exactly the n-th consecutive failure.
    #[test]
    fn breaker_trips_on_nth_failure(threshold in 1u32..20) {
        let cb = breaker(threshold, 60);
        let now = Instant::now();

        for _ in 0..threshold - 1 {
            cb.record_failure_at(now);
            prop_assert_eq!(cb.state(), BreakerState::Closed);
        }
        cb.record_failure_at(now);
        prop_assert_eq!(cb.state(), BreakerState::Open);
        prop_assert!(!cb.call_allowed_at(now));
    }

    /// A success anywhere in a failure run resets the consecutive count.
    #[test]
    fn success_resets_consecutive_count(threshold in 2u32..20, before in 1u32..20) {
        let before = before.min(threshold - 1);
        let cb = breaker(threshold, 60);
        let now = Instant::now();

        for _ in 0..before {
            cb.record_failure_at(now);
        }
        cb.record_success();
        prop_assert_eq!(cb.failure_count(), 0);

        for _ in 0..threshold - 1 {
            cb.record_failure_at(now);
        }
        prop_assert_eq!(cb.state(), BreakerState::Closed);
    }

    /// An open breaker rejects every call before the timeout and allows
    /// one probe after it.
    #[test]
    fn open_breaker_waits_for_timeout(timeout_secs in 1u64..600, early_ms in 0u64..1000) {
        let cb = breaker(1, timeout_secs);
        let t0 = Instant::now();
        cb.record_failure_at(t0);

        let timeout = Duration::from_secs(timeout_secs);
        let early = timeout.saturating_sub(Duration::from_millis(early_ms + 1));
        prop_assert!(!cb.call_allowed_at(t0 + early));
        prop_assert_eq!(cb.state(), BreakerState::Open);

        prop_assert!(cb.call_allowed_at(t0 + timeout));
        prop_assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    /// Any sequence of outcomes keeps the count within bounds and the
    /// state consistent with it.
    #[test]
    fn breaker_state_consistent(outcomes in vec(any::<bool>(), 0..100), threshold in 1u32..10) {
        let cb = breaker(threshold, 60);
        let now = Instant::now();
        let mut run = 0u32;
        let mut tripped = false;

        for ok in outcomes {
            if ok {
                cb.record_success();
                run = 0;
                tripped = false;
            } else {
                cb.record_failure_at(now);
                run += 1;
                if run >= threshold {
                    tripped = true;
                }
            }
            prop_assert_eq!(cb.failure_count(), run);
            let expected = if tripped { BreakerState::Open } else { BreakerState::Closed };
            prop_assert_eq!(cb.state(), expected);
        }
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

proptest! {
    /// Within one window exactly `limit` requests are allowed.
    #[test]
    fn limiter_allows_exactly_limit(limit in 1u32..50, extra in 1u32..20) {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60));
        let t0 = Instant::now();

        let allowed = (0..limit + extra)
            .filter(|i| {
                limiter
                    .check_at("client", "/r", limit, t0 + Duration::from_millis(u64::from(*i)))
                    .is_allowed()
            })
            .count();
        prop_assert_eq!(allowed, limit as usize);
    }

    /// No window of length `window` ever contains more than `limit`
    /// allowed requests.
    #[test]
    fn limiter_never_exceeds_limit_in_any_window(
        gaps in vec(0u64..3000, 1..200),
        limit in 1u32..10,
    ) {
        let window = Duration::from_secs(5);
        let limiter = SlidingWindowLimiter::new(window);
        let t0 = Instant::now();

        let mut at = t0;
        let mut allowed: Vec<Instant> = Vec::new();
        for gap in gaps {
            at += Duration::from_millis(gap);
            if limiter.check_at("c", "/r", limit, at).is_allowed() {
                allowed.push(at);
            }
        }

        for (i, start) in allowed.iter().enumerate() {
            let in_window = allowed[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < window)
                .count();
            prop_assert!(in_window <= limit as usize);
        }
    }
}

// =============================================================================
// ROUTING & SELECTION
// =============================================================================

proptest! {
    /// A route under a longer prefix always wins over its parent.
    #[test]
    fn longest_prefix_wins(segment in "[a-z]{1,8}", tail in "[a-z]{0,8}") {
        let mut table = RouteTable::new();
        table.add_route(RouteConfig::new("/api", "parent")).expect("route");
        table
            .add_route(RouteConfig::new(format!("/api/{}", segment), "child"))
            .expect("route");

        let path = format!("/api/{}/{}", segment, tail);
        let resolved = table.resolve("GET", &path);
        prop_assert!(matches!(resolved, RouteMatch::Matched(r) if r.service_name == "child"));
    }

    /// Weighted selection only ever returns an index with non-zero weight.
    #[test]
    fn weighted_index_respects_zero_weights(weights in vec(0u32..5, 1..10)) {
        match weighted_index(&weights) {
            Some(i) => prop_assert!(weights[i] > 0),
            None => prop_assert!(weights.iter().all(|&w| w == 0)),
        }
    }
}
