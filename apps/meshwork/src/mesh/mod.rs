//! # Service Mesh
//!
//! Resilient inter-service calls: discover healthy instances, pick one with
//! the load balancer, guard the call with a per-instance circuit breaker.
//!
//! Infrastructure failures never surface as errors. When no healthy
//! instance exists, the instance's breaker is open, the transport fails or
//! the target answers with a 5xx, the caller gets a synthetic fallback
//! body instead:
//!
//! ```json
//! { "error": "...", "service": "...", "endpoint": "...",
//!   "status": "degraded_mode", "fallback": true, "timestamp": "..." }
//! ```
//!
//! `Err` is reserved for programming errors (empty service name,
//! unsupported method).

mod health;

use crate::registry::ServiceRegistry;
use chrono::Utc;
use meshwork_core::primitives::is_supported_method;
use meshwork_core::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, InstanceId, LoadBalancer, MeshError,
    Strategy,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub use health::HealthCheckOutcome;

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub breaker: CircuitBreakerConfig,
    pub strategy: Strategy,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    /// Used when a call does not set its own timeout.
    pub request_timeout: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            strategy: Strategy::RoundRobin,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// CALL TYPES
// =============================================================================

/// One inter-service call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub service: String,
    /// Path on the target, e.g. `/users/42`.
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ServiceCall {
    /// A `GET` call.
    #[must_use]
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            method: "GET".to_string(),
            body: None,
            headers: BTreeMap::new(),
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    fn validate(&self) -> Result<reqwest::Method, MeshError> {
        if self.service.trim().is_empty() {
            return Err(MeshError::InvalidRequest(
                "service name must not be empty".to_string(),
            ));
        }
        if !is_supported_method(&self.method) {
            return Err(MeshError::InvalidRequest(format!(
                "unsupported method '{}'",
                self.method
            )));
        }
        reqwest::Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| MeshError::InvalidRequest(e.to_string()))
    }
}

/// Result of a mesh call: a real response or a fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshResponse {
    /// Upstream status, or 503 for a fallback.
    pub status: u16,
    pub body: Value,
    /// The instance that served the call.
    pub instance: Option<InstanceId>,
    pub fallback: bool,
}

impl MeshResponse {
    fn fallback(call: &ServiceCall, reason: &str) -> Self {
        Self {
            status: 503,
            body: json!({
                "error": reason,
                "service": call.service,
                "endpoint": call.endpoint,
                "status": "degraded_mode",
                "fallback": true,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            instance: None,
            fallback: true,
        }
    }
}

/// Mesh counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
}

// =============================================================================
// SERVICE MESH
// =============================================================================

pub struct ServiceMesh {
    registry: Arc<ServiceRegistry>,
    balancer: LoadBalancer,
    breakers: Mutex<HashMap<InstanceId, Arc<CircuitBreaker>>>,
    client: reqwest::Client,
    config: MeshConfig,
    counters: Counters,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ServiceMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMesh")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServiceMesh {
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, config: MeshConfig) -> Self {
        Self {
            registry,
            balancer: LoadBalancer::new(config.strategy),
            breakers: Mutex::new(HashMap::new()),
            client: reqwest::Client::new(),
            config,
            counters: Counters::default(),
            health_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    fn breakers(&self) -> MutexGuard<'_, HashMap<InstanceId, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The breaker guarding `id`, created on first use.
    pub fn breaker_for(&self, id: &InstanceId) -> Arc<CircuitBreaker> {
        self.breakers()
            .entry(*id)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(id.to_string(), self.config.breaker)))
            .clone()
    }

    /// Drop the breaker of a deregistered instance.
    pub fn forget(&self, id: &InstanceId) {
        self.breakers().remove(id);
    }

    #[must_use]
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers().values().map(|cb| cb.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    #[must_use]
    pub fn stats(&self) -> MeshStats {
        MeshStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn fallback(&self, call: &ServiceCall, reason: &str) -> MeshResponse {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            service = %call.service,
            endpoint = %call.endpoint,
            reason,
            "Serving fallback"
        );
        MeshResponse::fallback(call, reason)
    }

    /// Call a service through the mesh.
    pub async fn call_service(&self, call: ServiceCall) -> Result<MeshResponse, MeshError> {
        let method = call.validate()?;
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let instances = self.registry.discover(&call.service, true).await;
        let Some(instance) = self.balancer.select(&call.service, &instances) else {
            return Ok(self.fallback(&call, "no healthy instances available"));
        };

        let breaker = self.breaker_for(&instance.id);
        if !breaker.call_allowed() {
            return Ok(self.fallback(&call, "circuit breaker open"));
        }

        let path = if call.endpoint.starts_with('/') {
            call.endpoint.clone()
        } else {
            format!("/{}", call.endpoint)
        };
        let url = format!("{}{}", instance.base_url(), path);
        let timeout = call
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.request_timeout);

        let mut request = self.client.request(method, &url).timeout(timeout);
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        tracing::debug!(service = %call.service, instance = %instance.id, %url, "Calling service");
        match request.send().await {
            Ok(response) if response.status().is_server_error() => {
                breaker.record_failure();
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let reason = format!("upstream returned {}", response.status().as_u16());
                Ok(self.fallback(&call, &reason))
            }
            Ok(response) => {
                breaker.record_success();
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                let status = response.status().as_u16();
                let bytes = response.bytes().await.unwrap_or_default();
                let body = serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
                Ok(MeshResponse {
                    status,
                    body,
                    instance: Some(instance.id),
                    fallback: false,
                })
            }
            Err(e) => {
                breaker.record_failure();
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("transport error: {}", e)
                };
                Ok(self.fallback(&call, &reason))
            }
        }
    }

    /// Start the periodic health-check loop. Calling twice is a no-op.
    pub fn start_health_checks(self: &Arc<Self>) {
        let mut task = self.health_task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }
        let mesh = Arc::clone(self);
        let interval = self.config.health_check_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                mesh.check_all().await;
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "Mesh health checks started");
    }

    #[must_use]
    pub fn health_checks_running(&self) -> bool {
        self.health_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop the health-check loop.
    pub fn stop(&self) {
        if let Some(task) = self
            .health_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
            tracing::info!("Mesh health checks stopped");
        }
    }
}

impl Drop for ServiceMesh {
    fn drop(&mut self) {
        self.stop();
    }
}
