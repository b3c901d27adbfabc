//! # Sliding-Window Rate Limiter
//!
//! Counts timestamped requests inside a trailing window, per
//! `(client, route)` key.
//!
//! For every check:
//! 1. drop entries older than the window
//! 2. count what remains
//! 3. reject if the count has reached the limit
//! 4. otherwise record the request and push the key's expiry to
//!    `now + window`
//!
//! Keys whose expiry has passed are removed by [`SlidingWindowLimiter::purge_expired`],
//! which the gateway calls periodically so idle clients do not accumulate.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request recorded and allowed.
    Allowed {
        /// Requests still available in the current window.
        remaining: u32,
    },
    /// Limit reached; nothing was recorded.
    Limited {
        /// Time until the oldest counted request leaves the window.
        retry_after: Duration,
    },
}

impl RateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed { .. } => None,
            Self::Limited { retry_after } => Some(*retry_after),
        }
    }
}

#[derive(Debug)]
struct Window {
    hits: VecDeque<Instant>,
    expires_at: Instant,
}

/// In-memory sliding-window counter store.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the given window length.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(client: &str, route: &str) -> String {
        format!("rate_limit:{}:{}", client, route)
    }

    /// Check and record one request for `(client, route)`.
    pub fn check(&self, client: &str, route: &str, limit: u32) -> RateDecision {
        self.check_at(client, route, limit, Instant::now())
    }

    /// Check and record one request observed at `now`.
    pub fn check_at(&self, client: &str, route: &str, limit: u32, now: Instant) -> RateDecision {
        let mut entries = self.lock();
        let entry = entries
            .entry(Self::key(client, route))
            .or_insert_with(|| Window {
                hits: VecDeque::new(),
                expires_at: now + self.window,
            });

        while let Some(&oldest) = entry.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                entry.hits.pop_front();
            } else {
                break;
            }
        }

        let count = entry.hits.len() as u32;
        if count >= limit {
            let retry_after = entry
                .hits
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(self.window);
            return RateDecision::Limited { retry_after };
        }

        entry.hits.push_back(now);
        entry.expires_at = now + self.window;
        RateDecision::Allowed {
            remaining: limit - count - 1,
        }
    }

    /// Remove keys whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, window| window.expires_at > now);
        before - entries.len()
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourth_request_in_window_is_limited() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60));
        let t0 = Instant::now();

        let decisions: Vec<bool> = (0..4)
            .map(|i| {
                limiter
                    .check_at("10.0.0.1", "/api", 3, t0 + Duration::from_millis(i * 100))
                    .is_allowed()
            })
            .collect();

        assert_eq!(decisions, vec![true, true, true, false]);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(
            limiter.check_at("c", "/r", 2, now),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("c", "/r", 2, now),
            RateDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(limiter.check_at("c", "/r", 1, t0).is_allowed());
        let limited = limiter.check_at("c", "/r", 1, t0 + Duration::from_secs(4));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(6)));

        assert!(limiter.check_at("c", "/r", 1, t0 + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", "/r", 1, now).is_allowed());
        assert!(limiter.check_at("b", "/r", 1, now).is_allowed());
        assert!(limiter.check_at("a", "/other", 1, now).is_allowed());
        assert!(!limiter.check_at("a", "/r", 1, now).is_allowed());
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(limiter.check_at("c", "/r", 1, t0).is_allowed());
        for s in 1..10 {
            assert!(!limiter.check_at("c", "/r", 1, t0 + Duration::from_secs(s)).is_allowed());
        }
        assert!(limiter.check_at("c", "/r", 1, t0 + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn purge_drops_expired_keys() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(5));
        let t0 = Instant::now();
        let _ = limiter.check_at("a", "/r", 10, t0);
        let _ = limiter.check_at("b", "/r", 10, t0 + Duration::from_secs(3));

        assert_eq!(limiter.purge_expired_at(t0 + Duration::from_secs(6)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
