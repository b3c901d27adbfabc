//! # API Request/Response Types
//!
//! JSON bodies of the registry HTTP surface. Registration requests are
//! [`ServiceRegistration`](meshwork_core::ServiceRegistration) documents
//! deserialized as-is.

use meshwork_core::{InstanceId, ServiceInstance};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Orchestrator lifecycle state.
    pub state: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: state.into(),
        }
    }
}

// =============================================================================
// DISCOVERY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverQuery {
    #[serde(default = "default_healthy_only")]
    pub healthy_only: bool,
}

fn default_healthy_only() -> bool {
    true
}

impl Default for DiscoverQuery {
    fn default() -> Self {
        Self {
            healthy_only: default_healthy_only(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub success: bool,
    pub count: usize,
    pub services: Vec<ServiceInstance>,
}

impl ServicesResponse {
    #[must_use]
    pub fn new(services: Vec<ServiceInstance>) -> Self {
        Self {
            success: true,
            count: services.len(),
            services,
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<ServiceInstance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisterResponse {
    #[must_use]
    pub fn success(instance: ServiceInstance) -> Self {
        Self {
            success: true,
            instance: Some(instance),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            instance: None,
            error: Some(message.into()),
        }
    }
}

/// Result of a deregister or heartbeat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstanceResponse {
    #[must_use]
    pub fn success(id: InstanceId) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_query_defaults_to_healthy_only() {
        let query: DiscoverQuery = serde_json::from_str("{}").expect("parse");
        assert!(query.healthy_only);
        assert!(DiscoverQuery::default().healthy_only);
    }

    #[test]
    fn error_response_omits_instance() {
        let json = serde_json::to_value(RegisterResponse::error("bad")).expect("serialize");
        assert_eq!(json["success"], false);
        assert!(json.get("instance").is_none());
        assert_eq!(json["error"], "bad");
    }
}
