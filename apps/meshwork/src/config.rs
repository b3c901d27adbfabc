//! # Configuration
//!
//! `MeshworkConfig` is read from an optional TOML file and then overridden
//! by environment variables:
//!
//! - `MESHWORK_REGISTRY_PORT`: registry HTTP port
//! - `MESHWORK_GATEWAY_PORT`: gateway HTTP port
//! - `MESHWORK_DATABASE`: redb registry database path
//! - `MESHWORK_RATE_LIMIT`: global API requests per second (0 disables)
//! - `MESHWORK_CORS_ORIGINS`: comma-separated origins, or `*`
//!
//! Every field has a default, so an empty file (or no file) is valid.

use meshwork_core::primitives::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW};
use meshwork_core::{CircuitBreakerConfig, MeshError, Strategy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// SECTIONS
// =============================================================================

/// Registry, its HTTP surface and the mesh health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// redb database. `None` keeps the registry in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    /// Default timeout for mesh calls.
    pub request_timeout_ms: u64,
    /// Global governor limit for the registry API, in requests per second.
    pub api_rate_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origins: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            database: None,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            request_timeout_ms: 30_000,
            api_rate_limit: 100,
            cors_origins: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub rate_limit_window_secs: u64,
    pub default_rate_limit: u32,
    pub default_timeout_ms: u64,
    /// Consecutive forwarding failures before an endpoint is marked unhealthy.
    pub endpoint_failure_threshold: u32,
    pub probe_interval_secs: u64,
    pub purge_interval_secs: u64,
    /// Key rate limits on the first `x-forwarded-for` address instead of
    /// the socket peer. Only safe behind a proxy that sets the header.
    pub trust_forwarded_for: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            rate_limit_window_secs: DEFAULT_RATE_WINDOW.as_secs(),
            default_rate_limit: DEFAULT_RATE_LIMIT,
            default_timeout_ms: 30_000,
            endpoint_failure_threshold: 3,
            probe_interval_secs: 30,
            purge_interval_secs: 60,
            trust_forwarded_for: false,
        }
    }
}

/// Where the event bus fans events out to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTransport {
    /// In-process broadcast broker and pub/sub.
    #[default]
    Memory,
    /// No fan-out; pattern subscriptions are unavailable.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub transport: EventTransport,
    /// Directory for event and result JSON files. `None` keeps events in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_dir: Option<PathBuf>,
    /// Pub/sub channels are `{channel_prefix}:{event_type}`.
    pub channel_prefix: String,
    /// Broker exchange events are published to.
    pub exchange: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            transport: EventTransport::Memory,
            persist_dir: None,
            channel_prefix: "events".to_string(),
            exchange: "meshwork.events".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the inference service. `None` disables predictions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub health_monitor_interval_secs: u64,
    pub strategy: Strategy,
    /// Address the orchestrator registers itself under.
    pub self_host: String,
    pub self_port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_monitor_interval_secs: 30,
            strategy: Strategy::RoundRobin,
            self_host: "localhost".to_string(),
            self_port: 8000,
        }
    }
}

// =============================================================================
// ROOT CONFIG
// =============================================================================

/// Complete control-plane configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshworkConfig {
    pub registry: RegistryConfig,
    pub breaker: CircuitBreakerConfig,
    pub gateway: GatewayConfig,
    pub events: EventsConfig,
    pub inference: InferenceConfig,
    pub orchestrator: OrchestratorConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, MeshError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| MeshError::ConfigError(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

impl MeshworkConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, MeshError> {
        toml::from_str(content).map_err(|e| MeshError::ConfigError(e.to_string()))
    }

    /// Read a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, MeshError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MeshError::ConfigError(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| MeshError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, MeshError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `MESHWORK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), MeshError> {
        if let Some(port) = env_parse::<u16>("MESHWORK_REGISTRY_PORT")? {
            self.registry.port = Some(port);
        }
        if let Some(port) = env_parse::<u16>("MESHWORK_GATEWAY_PORT")? {
            self.gateway.port = Some(port);
        }
        if let Some(path) = env_parse::<PathBuf>("MESHWORK_DATABASE")? {
            self.registry.database = Some(path);
        }
        if let Some(limit) = env_parse::<u32>("MESHWORK_RATE_LIMIT")? {
            self.registry.api_rate_limit = limit;
        }
        if let Ok(origins) = std::env::var("MESHWORK_CORS_ORIGINS") {
            self.registry.cors_origins = Some(origins);
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, MeshError> {
        toml::to_string_pretty(self).map_err(|e| MeshError::SerializationError(e.to_string()))
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.registry.health_check_interval_secs.max(1))
    }

    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.registry.health_check_timeout_secs.max(1))
    }

    #[must_use]
    pub fn health_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.orchestrator.health_monitor_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = MeshworkConfig::from_toml_str("").expect("parse");
        assert_eq!(config, MeshworkConfig::default());
        assert_eq!(config.gateway.default_rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(config.orchestrator.strategy, Strategy::RoundRobin);
        assert_eq!(config.events.transport, EventTransport::Memory);
    }

    #[test]
    fn sections_override_defaults() {
        let config = MeshworkConfig::from_toml_str(
            r#"
            [registry]
            port = 8500
            database = "mesh.redb"

            [breaker]
            failure_threshold = 2
            timeout = 10

            [gateway]
            port = 8080
            default_rate_limit = 3

            [events]
            transport = "none"

            [orchestrator]
            strategy = "random"
            "#,
        )
        .expect("parse");

        assert_eq!(config.registry.port, Some(8500));
        assert_eq!(config.registry.database, Some(PathBuf::from("mesh.redb")));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.timeout, Duration::from_secs(10));
        assert_eq!(config.gateway.default_rate_limit, 3);
        assert_eq!(config.gateway.probe_interval_secs, 30);
        assert!(!config.gateway.trust_forwarded_for);
        assert_eq!(config.orchestrator.strategy, Strategy::Random);
        assert_eq!(config.events.transport, EventTransport::None);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let result = MeshworkConfig::from_toml_str("[registry\nport = ");
        assert!(matches!(result, Err(MeshError::ConfigError(_))));
    }

    #[test]
    fn renders_back_to_toml() {
        let mut config = MeshworkConfig::default();
        config.gateway.port = Some(9090);
        let rendered = config.to_toml_string().expect("render");
        let parsed = MeshworkConfig::from_toml_str(&rendered).expect("reparse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = MeshworkConfig::from_file(Path::new("/nonexistent/meshwork.toml"));
        assert!(matches!(result, Err(MeshError::ConfigError(_))));
    }
}
