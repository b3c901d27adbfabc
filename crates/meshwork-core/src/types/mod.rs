//! # Core Type Definitions
//!
//! This module contains the service-side data model of the control plane:
//! - Instance identifiers (`InstanceId`)
//! - Lifecycle state (`ServiceState`)
//! - Registered instances and their registration input
//!   (`ServiceInstance`, `ServiceRegistration`)
//! - Error types (`MeshError`)
//!
//! Event types live in [`crate::event`].

use crate::primitives::is_valid_service_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of one registered service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Generate a fresh random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an instance id from its string form.
    pub fn parse(s: &str) -> Result<Self, MeshError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| MeshError::InvalidRequest(format!("invalid instance id '{}': {}", s, e)))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// SERVICE STATE
// =============================================================================

/// Lifecycle state of a service instance.
///
/// Freshly registered instances start in `Starting` and only become
/// discoverable once a health check marks them `Healthy` (or `Degraded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Draining,
    Terminated,
}

impl ServiceState {
    /// States that may receive traffic.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Upper-case wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
            Self::Draining => "DRAINING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// REGISTRATION INPUT
// =============================================================================

fn default_service_type() -> String {
    "http".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Everything a service supplies when it joins the mesh.
///
/// The gateway hints (`route_prefix`, `methods`, `rate_limit`, `timeout_ms`,
/// `weight`) are ignored by the registry itself. They are kept on the
/// instance as [`GatewayHints`]; the orchestrator uses them to install the
/// matching edge route and endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub route_prefix: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub weight: Option<u32>,
}

impl ServiceRegistration {
    /// Minimal registration with defaults for everything but identity.
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            service_type: default_service_type(),
            host: host.into(),
            port,
            version: default_version(),
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            health_check_url: None,
            endpoints: Vec::new(),
            route_prefix: None,
            methods: Vec::new(),
            rate_limit: None,
            timeout_ms: None,
            weight: None,
        }
    }

    /// Set an explicit health-check URL.
    #[must_use]
    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set the gateway route prefix.
    #[must_use]
    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    /// Set the per-route rate limit used by the gateway.
    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Validate the registration.
    ///
    /// Malformed registrations are configuration errors: they are rejected
    /// immediately and never retried.
    pub fn validate(&self) -> Result<(), MeshError> {
        if !is_valid_service_name(&self.name) {
            return Err(MeshError::InvalidRegistration(format!(
                "invalid service name '{}'",
                self.name
            )));
        }
        if self.host.trim().is_empty() {
            return Err(MeshError::InvalidRegistration(
                "host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(MeshError::InvalidRegistration(
                "port must be non-zero".to_string(),
            ));
        }
        if let Some(prefix) = &self.route_prefix {
            if !prefix.starts_with('/') {
                return Err(MeshError::InvalidRegistration(format!(
                    "route prefix '{}' must start with '/'",
                    prefix
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// SERVICE INSTANCE
// =============================================================================

/// Edge settings carried by an instance so the gateway can be rebuilt from
/// the registry alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_prefix: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// One running, addressable copy of a named service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub name: String,
    pub service_type: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub metadata: BTreeMap<String, Value>,
    pub tags: Vec<String>,
    pub state: ServiceState,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub health_check_url: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub gateway: GatewayHints,
}

impl ServiceInstance {
    /// Build a new `Starting` instance from a registration.
    #[must_use]
    pub fn from_registration(registration: &ServiceRegistration) -> Self {
        let now = Utc::now();
        let base = base_url(&registration.host, registration.port);
        let health_check_url = registration
            .health_check_url
            .clone()
            .unwrap_or_else(|| format!("{}/health", base));

        Self {
            id: InstanceId::new(),
            name: registration.name.clone(),
            service_type: registration.service_type.clone(),
            host: registration.host.clone(),
            port: registration.port,
            version: registration.version.clone(),
            metadata: registration.metadata.clone(),
            tags: registration.tags.clone(),
            state: ServiceState::Starting,
            registered_at: now,
            last_heartbeat: now,
            health_check_url,
            endpoints: registration.endpoints.clone(),
            gateway: GatewayHints {
                route_prefix: registration.route_prefix.clone(),
                methods: registration.methods.clone(),
                rate_limit: registration.rate_limit,
                timeout_ms: registration.timeout_ms,
                weight: registration.weight,
            },
        }
    }

    /// `http://{host}:{port}`
    #[must_use]
    pub fn base_url(&self) -> String {
        base_url(&self.host, self.port)
    }
}

fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Meshwork control plane.
///
/// Infrastructure failures (unreachable targets, open breakers, broker
/// outages) are generally absorbed by the component that hits them. This
/// enum carries the failures that must reach the caller: malformed input,
/// missing records, storage and configuration problems.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A registration was rejected by validation.
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// The requested instance is not registered.
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// A request was malformed (programming error on the caller's side).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A gateway route definition was malformed.
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// An operation is not allowed in the current lifecycle state.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// The persistent store failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An outbound transport (HTTP, broker, pub/sub) failed.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The external inference service failed.
    #[error("Inference error: {0}")]
    InferenceError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_defaults_health_url() {
        let reg = ServiceRegistration::new("billing", "10.0.0.5", 8080);
        let instance = ServiceInstance::from_registration(&reg);

        assert_eq!(instance.state, ServiceState::Starting);
        assert_eq!(instance.health_check_url, "http://10.0.0.5:8080/health");
        assert_eq!(instance.base_url(), "http://10.0.0.5:8080");
    }

    #[test]
    fn instance_keeps_gateway_hints() {
        let mut reg = ServiceRegistration::new("billing", "10.0.0.5", 8080);
        reg.route_prefix = Some("/billing".to_string());
        reg.weight = Some(3);
        let instance = ServiceInstance::from_registration(&reg);
        assert_eq!(instance.gateway.route_prefix.as_deref(), Some("/billing"));
        assert_eq!(instance.gateway.weight, Some(3));

        let mut row = serde_json::to_value(&instance).expect("encode");
        row.as_object_mut().expect("object").remove("gateway");
        let old: ServiceInstance = serde_json::from_value(row).expect("decode");
        assert_eq!(old.gateway, GatewayHints::default());
    }

    #[test]
    fn registration_keeps_explicit_health_url() {
        let reg = ServiceRegistration::new("billing", "localhost", 8080)
            .with_health_check_url("http://localhost:8080/ready");
        let instance = ServiceInstance::from_registration(&reg);
        assert_eq!(instance.health_check_url, "http://localhost:8080/ready");
    }

    #[test]
    fn registration_validation() {
        assert!(ServiceRegistration::new("ok", "localhost", 1).validate().is_ok());
        assert!(matches!(
            ServiceRegistration::new("", "localhost", 1).validate(),
            Err(MeshError::InvalidRegistration(_))
        ));
        assert!(ServiceRegistration::new("ok", " ", 1).validate().is_err());
        assert!(ServiceRegistration::new("ok", "localhost", 0).validate().is_err());
        assert!(
            ServiceRegistration::new("ok", "localhost", 1)
                .with_route_prefix("api")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn available_states() {
        assert!(ServiceState::Healthy.is_available());
        assert!(ServiceState::Degraded.is_available());
        assert!(!ServiceState::Starting.is_available());
        assert!(!ServiceState::Unhealthy.is_available());
        assert!(!ServiceState::Draining.is_available());
        assert!(!ServiceState::Terminated.is_available());
    }

    #[test]
    fn state_serializes_upper_case() {
        let json = serde_json::to_string(&ServiceState::Healthy).expect("serialize");
        assert_eq!(json, "\"HEALTHY\"");
        assert_eq!(ServiceState::Draining.to_string(), "DRAINING");
    }

    #[test]
    fn registration_deserializes_with_defaults() {
        let reg: ServiceRegistration =
            serde_json::from_str(r#"{"name":"users","host":"localhost","port":9000}"#)
                .expect("parse");
        assert_eq!(reg.service_type, "http");
        assert_eq!(reg.version, "1.0.0");
        assert!(reg.tags.is_empty());
        assert!(reg.route_prefix.is_none());
    }

    #[test]
    fn instance_id_round_trips_through_display() {
        let id = InstanceId::new();
        let parsed = InstanceId::parse(&id.to_string()).expect("parse");
        assert_eq!(id, parsed);
        assert!(InstanceId::parse("not-a-uuid").is_err());
    }
}
