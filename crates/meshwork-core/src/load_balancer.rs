//! # Load Balancer
//!
//! Selection policy over a pre-filtered set of healthy instances.
//!
//! The balancer holds no instance state of its own: callers discover the
//! healthy instances first and hand them in. Only the round-robin cursor
//! (one per service name) is kept between calls.

use crate::ServiceInstance;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    /// Placeholder: connection counts are not tracked yet, so this picks
    /// the first candidate.
    LeastConnections,
}

/// Instance selector.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    strategy: Strategy,
    cursors: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    /// Create a load balancer with the given strategy.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick one instance of `service_name` from `instances`.
    ///
    /// Returns `None` only when `instances` is empty.
    pub fn select<'a>(
        &self,
        service_name: &str,
        instances: &'a [ServiceInstance],
    ) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        match self.strategy {
            Strategy::RoundRobin => {
                let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
                let cursor = cursors.entry(service_name.to_string()).or_insert(0);
                let index = *cursor % instances.len();
                *cursor = cursor.wrapping_add(1);
                instances.get(index)
            }
            Strategy::Random => {
                let index = rand::rng().random_range(0..instances.len());
                instances.get(index)
            }
            Strategy::LeastConnections => instances.first(),
        }
    }

    /// Forget the round-robin cursor of a service.
    pub fn reset(&self, service_name: &str) {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        cursors.remove(service_name);
    }
}

/// Pick an index with probability proportional to its weight.
///
/// Zero weights are never picked. Returns `None` when every weight is zero
/// or the slice is empty.
pub fn weighted_index(weights: &[u32]) -> Option<usize> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 {
        return None;
    }

    let mut point = rand::rng().random_range(0..total);
    for (index, &weight) in weights.iter().enumerate() {
        let weight = u64::from(weight);
        if point < weight {
            return Some(index);
        }
        point -= weight;
    }
    None
}
