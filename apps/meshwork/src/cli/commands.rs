//! # CLI Command Implementations

use chrono::Utc;
use meshwork::{MeshworkConfig, Orchestrator};
use meshwork_core::{MeshError, Registry, ServiceInstance};
use std::path::Path;
use std::sync::Arc;

const DEFAULT_REGISTRY_PORT: u16 = 8000;

/// Open the configured registry database read-side.
fn open_registry(config: &MeshworkConfig) -> Result<Registry, MeshError> {
    let path = config.registry.database.as_ref().ok_or_else(|| {
        MeshError::ConfigError(
            "no registry database configured (use --database or registry.database)".to_string(),
        )
    })?;
    if !path.exists() {
        return Err(MeshError::StorageError(format!(
            "registry database '{}' does not exist",
            path.display()
        )));
    }
    Registry::with_redb(path)
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Run the orchestrator until Ctrl+C.
pub async fn cmd_serve(
    mut config: MeshworkConfig,
    host: Option<String>,
    port: Option<u16>,
    gateway_port: Option<u16>,
) -> Result<(), MeshError> {
    if let Some(host) = host {
        config.registry.host = host;
    }
    config.registry.port = port.or(config.registry.port).or(Some(DEFAULT_REGISTRY_PORT));
    if gateway_port.is_some() {
        config.gateway.port = gateway_port;
    }

    println!("Meshwork control plane starting...");
    println!();
    println!("Configuration:");
    println!(
        "  Registry: {}:{}",
        config.registry.host,
        config.registry.port.unwrap_or(DEFAULT_REGISTRY_PORT)
    );
    match config.gateway.port {
        Some(p) => println!("  Gateway:  {}:{}", config.gateway.host, p),
        None => println!("  Gateway:  disabled"),
    }
    match &config.registry.database {
        Some(db) => println!("  Database: {}", db.display()),
        None => println!("  Database: in-memory"),
    }
    println!();
    println!("Endpoints:");
    println!("  GET    /services            - List instances");
    println!("  GET    /services/{{name}}     - Discover a service");
    println!("  POST   /services/register   - Register an instance");
    println!("  DELETE /services/{{id}}       - Deregister an instance");
    println!("  POST   /services/{{id}}/heartbeat");
    println!("  GET    /status              - System status");
    println!("  GET    /health              - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let orchestrator = Arc::new(Orchestrator::new(config)?);
    orchestrator.start().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| MeshError::IoError(format!("Signal handler failed: {}", e)))?;
    tracing::info!("Shutdown requested");

    orchestrator.stop().await
}

// =============================================================================
// SERVICES COMMAND
// =============================================================================

fn heartbeat_age(instance: &ServiceInstance) -> String {
    let secs = (Utc::now() - instance.last_heartbeat).num_seconds().max(0);
    if secs < 120 {
        format!("{}s ago", secs)
    } else if secs < 7200 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

/// List instances stored in the registry database.
pub fn cmd_services(
    config: &MeshworkConfig,
    name: Option<&str>,
    json_mode: bool,
) -> Result<(), MeshError> {
    let registry = open_registry(config)?;
    let instances = match name {
        Some(n) => registry.discover(n, false),
        None => registry.list(),
    };

    if json_mode {
        let json = serde_json::to_string_pretty(&instances)
            .map_err(|e| MeshError::SerializationError(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    if instances.is_empty() {
        println!("No registered instances.");
        return Ok(());
    }

    println!(
        "{:<24} {:<36} {:<28} {:<10} {}",
        "SERVICE", "ID", "ADDRESS", "STATE", "HEARTBEAT"
    );
    for instance in &instances {
        println!(
            "{:<24} {:<36} {:<28} {:<10} {}",
            instance.name,
            instance.id.to_string(),
            format!("{}:{}", instance.host, instance.port),
            instance.state.as_str(),
            heartbeat_age(instance)
        );
    }

    let counts = registry.counts();
    println!();
    println!(
        "{} instance(s) across {} service(s): {} healthy, {} unhealthy",
        counts.total, counts.services, counts.healthy, counts.unhealthy
    );
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Write the registry snapshot to `output`.
pub fn cmd_export(config: &MeshworkConfig, output: &Path) -> Result<(), MeshError> {
    let registry = open_registry(config)?;
    registry.export_snapshot(output)?;
    println!(
        "Exported {} instance(s) to {}",
        registry.len(),
        output.display()
    );
    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

pub fn cmd_config(config: &MeshworkConfig) -> Result<(), MeshError> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_core::ServiceRegistration;
    use tempfile::TempDir;

    #[test]
    fn services_requires_database() {
        let config = MeshworkConfig::default();
        let err = cmd_services(&config, None, true).expect_err("no database");
        assert!(matches!(err, MeshError::ConfigError(_)));
    }

    #[test]
    fn export_writes_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join("registry.redb");
        {
            let mut registry = Registry::with_redb(&db).expect("open");
            registry
                .register(&ServiceRegistration::new("users", "localhost", 9000))
                .expect("register");
        }

        let mut config = MeshworkConfig::default();
        config.registry.database = Some(db);
        let out = dir.path().join("snapshot.json");
        cmd_export(&config, &out).expect("export");

        let written = std::fs::read_to_string(&out).expect("read");
        let json: serde_json::Value = serde_json::from_str(&written).expect("json");
        assert_eq!(json["services"]["users"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn missing_database_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = MeshworkConfig::default();
        config.registry.database = Some(dir.path().join("absent.redb"));
        assert!(matches!(
            cmd_export(&config, &dir.path().join("out.json")),
            Err(MeshError::StorageError(_))
        ));
    }
}
