//! Gateway endpoint records.
//!
//! These are the edge's own view of where a service lives. They are kept
//! apart from the mesh's `ServiceInstance` records: a new endpoint starts
//! HEALTHY, and its status only follows the gateway's forwarding results
//! and probes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointStatus {
    Healthy,
    Unhealthy,
}

/// One upstream target of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service_name: String,
    /// Base URL without trailing slash, e.g. `http://10.0.0.5:8080`.
    pub url: String,
    pub weight: u32,
    pub status: EndpointStatus,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ServiceEndpoint {
    #[must_use]
    pub fn new(service_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            url: url.into().trim_end_matches('/').to_string(),
            weight: 1,
            status: EndpointStatus::Healthy,
            consecutive_failures: 0,
            last_checked: None,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == EndpointStatus::Healthy
    }

    /// Count a forwarding failure. Returns true when this failure marked
    /// the endpoint unhealthy.
    pub(crate) fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.is_healthy() && self.consecutive_failures >= threshold.max(1) {
            self.status = EndpointStatus::Unhealthy;
            return true;
        }
        false
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub(crate) fn restore(&mut self) {
        self.status = EndpointStatus::Healthy;
        self.consecutive_failures = 0;
        self.last_checked = Some(Utc::now());
    }
}
