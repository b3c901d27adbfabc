//! # Orchestrator
//!
//! The composition root. Owns the registry, mesh, gateway, event bus and
//! inference client, and brings them up and down in order.
//!
//! ## Lifecycle
//!
//! ```text
//! INITIALIZING ─► STARTING ─► RUNNING ─► STOPPING ─► STOPPED
//!                    │                      │
//!                    └──────► ERROR ◄───────┘
//! ```
//!
//! `start()` order: event bus, mesh health checks, gateway (maintenance
//! loops, then listener if a port is set), inference service, registry HTTP
//! surface (if a port is set), component health monitor, and finally
//! self-registration as service `orchestrator`. `stop()` unwinds in reverse.

use crate::api::{self, AppState};
use crate::config::{EventTransport, MeshworkConfig};
use crate::events::{EventBus, EventBusConfig, InMemoryBroker, InMemoryPubSub};
use crate::gateway::{self, ApiGateway, GatewayStats, ServiceEndpoint};
use crate::inference::{HttpInferenceClient, InferenceService};
use crate::mesh::{MeshConfig, MeshResponse, MeshStats, ServiceCall, ServiceMesh};
use crate::registry::ServiceRegistry;
use meshwork_core::{
    EventId, EventPriority, EventStore, InstanceId, MeshError, RegistryCounts, RouteConfig,
    ServiceInstance, ServiceRegistration, ServiceState,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const SELF_SERVICE_NAME: &str = "orchestrator";

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl OrchestratorState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounters {
    pub events_processed: u64,
    pub predictions_made: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
}

/// Snapshot returned by [`Orchestrator::get_system_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub state: OrchestratorState,
    pub uptime_secs: u64,
    pub registry: RegistryCounts,
    /// Component name -> healthy, as of the last health-monitor pass.
    pub components: BTreeMap<String, bool>,
    pub counters: StatusCounters,
    pub mesh: MeshStats,
    pub gateway: GatewayStats,
    pub events: crate::events::BusStats,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct BoundAddrs {
    registry: Option<SocketAddr>,
    gateway: Option<SocketAddr>,
}

pub struct Orchestrator {
    config: MeshworkConfig,
    state: Mutex<OrchestratorState>,
    registry: Arc<ServiceRegistry>,
    mesh: Arc<ServiceMesh>,
    gateway: Arc<ApiGateway>,
    bus: Arc<EventBus>,
    inference: Option<Arc<dyn InferenceService>>,
    started_at: Mutex<Option<Instant>>,
    self_id: Mutex<Option<InstanceId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    components: Mutex<BTreeMap<String, bool>>,
    bound: Mutex<BoundAddrs>,
    predictions: AtomicU64,
    requests_processed: AtomicU64,
    requests_failed: AtomicU64,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, MeshError> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| MeshError::IoError(format!("Bind {} failed: {}", addr, e)))
}

impl Orchestrator {
    /// Build every component from configuration.
    pub fn new(config: MeshworkConfig) -> Result<Self, MeshError> {
        let registry = match &config.registry.database {
            Some(path) => ServiceRegistry::open(path)?,
            None => ServiceRegistry::default(),
        };
        let store = match &config.events.persist_dir {
            Some(dir) => EventStore::with_dir(dir)?,
            None => EventStore::in_memory(),
        };
        let mut bus = EventBus::new(
            Arc::new(store),
            EventBusConfig {
                channel_prefix: config.events.channel_prefix.clone(),
                exchange: config.events.exchange.clone(),
            },
        );
        if config.events.transport == EventTransport::Memory {
            bus = bus
                .with_broker(Arc::new(InMemoryBroker::new()))
                .with_pubsub(Arc::new(InMemoryPubSub::new()));
        }
        let inference = config.inference.base_url.as_ref().map(|url| {
            Arc::new(HttpInferenceClient::new(
                url.clone(),
                Duration::from_millis(config.inference.timeout_ms),
            )) as Arc<dyn InferenceService>
        });

        Ok(Self::from_parts(
            config,
            Arc::new(registry),
            Arc::new(bus),
            inference,
        ))
    }

    /// Assemble from pre-built parts (custom transports, test doubles).
    #[must_use]
    pub fn from_parts(
        config: MeshworkConfig,
        registry: Arc<ServiceRegistry>,
        bus: Arc<EventBus>,
        inference: Option<Arc<dyn InferenceService>>,
    ) -> Self {
        let mesh = ServiceMesh::new(
            Arc::clone(&registry),
            MeshConfig {
                breaker: config.breaker,
                strategy: config.orchestrator.strategy,
                health_check_interval: config.health_check_interval(),
                health_check_timeout: config.health_check_timeout(),
                request_timeout: Duration::from_millis(config.registry.request_timeout_ms),
            },
        );
        let gateway = ApiGateway::new(config.gateway.clone(), config.breaker);

        Self {
            config,
            state: Mutex::new(OrchestratorState::Initializing),
            registry,
            mesh: Arc::new(mesh),
            gateway: Arc::new(gateway),
            bus,
            inference,
            started_at: Mutex::new(None),
            self_id: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            components: Mutex::new(BTreeMap::new()),
            bound: Mutex::new(BoundAddrs::default()),
            predictions: AtomicU64::new(0),
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &MeshworkConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *lock(&self.state)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn mesh(&self) -> &Arc<ServiceMesh> {
        &self.mesh
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<ApiGateway> {
        &self.gateway
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Address the registry HTTP surface is listening on, once started.
    #[must_use]
    pub fn registry_addr(&self) -> Option<SocketAddr> {
        lock(&self.bound).registry
    }

    /// Address the gateway is listening on, once started.
    #[must_use]
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        lock(&self.bound).gateway
    }

    fn transition(
        &self,
        allowed: &[OrchestratorState],
        to: OrchestratorState,
    ) -> Result<(), MeshError> {
        let mut state = lock(&self.state);
        if !allowed.contains(&*state) {
            return Err(MeshError::InvalidStateTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %*state, %to, "Orchestrator state");
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: OrchestratorState) {
        *lock(&self.state) = to;
    }

    fn mark(&self, component: &str, healthy: bool) {
        lock(&self.components).insert(component.to_string(), healthy);
    }

    fn spawn(&self, task: JoinHandle<()>) {
        lock(&self.tasks).push(task);
    }

    async fn announce(&self, event_type: &str, data: Value) {
        if let Err(e) = self
            .bus
            .publish(event_type, data, SELF_SERVICE_NAME, EventPriority::Normal, None)
            .await
        {
            tracing::warn!(%event_type, error = %e, "Lifecycle event not published");
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Bring every component up.
    pub async fn start(self: &Arc<Self>) -> Result<(), MeshError> {
        self.transition(
            &[OrchestratorState::Initializing, OrchestratorState::Stopped],
            OrchestratorState::Starting,
        )?;
        tracing::info!("Starting orchestrator");

        if let Err(e) = self.start_components().await {
            tracing::error!(error = %e, "Orchestrator failed to start");
            self.abort_tasks();
            self.set_state(OrchestratorState::Error);
            return Err(e);
        }

        *lock(&self.started_at) = Some(Instant::now());
        self.set_state(OrchestratorState::Running);
        self.announce(
            "orchestrator.started",
            json!({
                "registry_addr": self.registry_addr().map(|a| a.to_string()),
                "gateway_addr": self.gateway_addr().map(|a| a.to_string()),
            }),
        )
        .await;
        tracing::info!("Orchestrator running");
        Ok(())
    }

    async fn start_components(self: &Arc<Self>) -> Result<(), MeshError> {
        self.mark("event_bus", self.bus.is_healthy());

        self.mesh.start_health_checks();
        self.mark("service_mesh", true);

        self.restore_edge().await;
        self.gateway.start();
        if let Some(port) = self.config.gateway.port {
            let listener = bind(&self.config.gateway.host, port).await?;
            let addr = listener
                .local_addr()
                .map_err(|e| MeshError::IoError(e.to_string()))?;
            lock(&self.bound).gateway = Some(addr);
            tracing::info!("Meshwork gateway listening on {}", addr);

            let gw = Arc::clone(&self.gateway);
            self.spawn(tokio::spawn(async move {
                if let Err(e) = gateway::serve_gateway(listener, gw).await {
                    tracing::error!(error = %e, "Gateway server stopped");
                }
            }));
        }
        self.mark("api_gateway", true);

        if let Some(inference) = &self.inference {
            inference.start().await?;
            self.mark("inference", true);
        }

        if let Some(port) = self.config.registry.port {
            let listener = bind(&self.config.registry.host, port).await?;
            let addr = listener
                .local_addr()
                .map_err(|e| MeshError::IoError(e.to_string()))?;
            lock(&self.bound).registry = Some(addr);
            tracing::info!("Meshwork registry listening on {}", addr);

            let state = AppState::new(Arc::clone(self));
            self.spawn(tokio::spawn(async move {
                if let Err(e) = api::serve(listener, state).await {
                    tracing::error!(error = %e, "Registry server stopped");
                }
            }));
        }

        let monitor = Arc::clone(self);
        let every = self.config.health_monitor_interval();
        self.spawn(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                monitor.check_components().await;
            }
        }));

        self.register_self().await
    }

    async fn register_self(&self) -> Result<(), MeshError> {
        let port = self
            .registry_addr()
            .map(|a| a.port())
            .unwrap_or(self.config.orchestrator.self_port);
        let registration = ServiceRegistration::new(
            SELF_SERVICE_NAME,
            self.config.orchestrator.self_host.clone(),
            port,
        );
        let instance = self.registry.register(&registration).await?;
        self.registry
            .update_state(&instance.id, ServiceState::Healthy)
            .await?;
        *lock(&self.self_id) = Some(instance.id);
        Ok(())
    }

    /// Check every component and record the result.
    pub async fn check_components(&self) -> BTreeMap<String, bool> {
        let mut health = BTreeMap::new();
        health.insert("event_bus".to_string(), self.bus.is_healthy());
        health.insert(
            "service_mesh".to_string(),
            self.mesh.health_checks_running(),
        );
        health.insert("api_gateway".to_string(), self.gateway.is_running());
        if let Some(inference) = &self.inference {
            health.insert("inference".to_string(), inference.is_healthy().await);
        }

        for (component, healthy) in &health {
            if !healthy {
                tracing::warn!(%component, "Component unhealthy");
            }
        }
        *lock(&self.components) = health.clone();
        health
    }

    fn abort_tasks(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.gateway.stop();
        self.mesh.stop();
        self.bus.stop();
    }

    /// Tear everything down in reverse order.
    pub async fn stop(&self) -> Result<(), MeshError> {
        self.transition(
            &[OrchestratorState::Running, OrchestratorState::Error],
            OrchestratorState::Stopping,
        )?;
        tracing::info!("Stopping orchestrator");
        self.announce("orchestrator.stopping", json!({})).await;

        let self_id = lock(&self.self_id).take();
        let deregistered = match self_id {
            Some(id) => self.registry.deregister(&id).await.map(|_| ()),
            None => Ok(()),
        };

        self.abort_tasks();
        {
            let mut bound = lock(&self.bound);
            *bound = BoundAddrs::default();
        }
        lock(&self.components).clear();

        match deregistered {
            Ok(()) => {
                self.set_state(OrchestratorState::Stopped);
                tracing::info!("Orchestrator stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Orchestrator stopped with errors");
                self.set_state(OrchestratorState::Error);
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    /// Register a service and install its gateway route and endpoint.
    pub async fn register_service(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceInstance, MeshError> {
        let instance = self.registry.register(&registration).await?;

        if let Err(e) = self.install_edge(&instance) {
            // Keep registry and gateway in step.
            if let Err(rollback) = self.registry.deregister(&instance.id).await {
                tracing::warn!(id = %instance.id, error = %rollback, "Registration rollback failed");
            }
            return Err(e);
        }

        self.announce(
            "service.registered",
            json!({
                "instance_id": instance.id,
                "service": instance.name,
                "address": instance.base_url(),
            }),
        )
        .await;
        Ok(instance)
    }

    /// Install the route and endpoint described by an instance's gateway
    /// hints. Re-installing the same instance replaces both.
    fn install_edge(&self, instance: &ServiceInstance) -> Result<(), MeshError> {
        let hints = &instance.gateway;
        if let Some(prefix) = &hints.route_prefix {
            let mut route =
                RouteConfig::new(prefix.clone(), instance.name.clone()).with_methods(&hints.methods);
            route.rate_limit = hints.rate_limit;
            route.timeout_ms = hints.timeout_ms;
            self.gateway.add_route(route)?;
        }
        self.gateway.add_endpoint(
            ServiceEndpoint::new(instance.name.clone(), instance.base_url())
                .with_weight(hints.weight.unwrap_or(1)),
        );
        Ok(())
    }

    /// Rebuild gateway routes and endpoints from instances the registry
    /// reloaded from disk.
    async fn restore_edge(&self) {
        let mut restored = 0usize;
        for instance in self.registry.list().await {
            if instance.name == SELF_SERVICE_NAME {
                continue;
            }
            match self.install_edge(&instance) {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::warn!(id = %instance.id, error = %e, "Gateway entry not restored");
                }
            }
        }
        if restored > 0 {
            tracing::info!(restored, "Gateway rebuilt from registry");
        }
    }

    /// Deregister an instance and remove it from the gateway. Routes go
    /// with the last instance of a service.
    pub async fn deregister_service(&self, id: &InstanceId) -> Result<bool, MeshError> {
        let Some(instance) = self.registry.deregister(id).await? else {
            return Ok(false);
        };

        self.gateway
            .remove_endpoint(&instance.name, &instance.base_url());
        if self.registry.discover(&instance.name, false).await.is_empty() {
            self.gateway.remove_routes_for(&instance.name);
        }
        self.mesh.forget(id);

        self.announce(
            "service.deregistered",
            json!({ "instance_id": instance.id, "service": instance.name }),
        )
        .await;
        Ok(true)
    }

    /// Call a service through the mesh.
    pub async fn call_service(&self, call: ServiceCall) -> Result<MeshResponse, MeshError> {
        let response = self.mesh.call_service(call).await?;
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        if response.fallback {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(response)
    }

    pub async fn publish_event(
        &self,
        event_type: &str,
        data: Value,
        source: &str,
        priority: EventPriority,
        correlation_id: Option<String>,
    ) -> Result<EventId, MeshError> {
        self.bus
            .publish(event_type, data, source, priority, correlation_id)
            .await
    }

    /// Run a prediction and publish `prediction.completed` or
    /// `prediction.failed`.
    pub async fn make_prediction(&self, model: &str, input: Value) -> Result<Value, MeshError> {
        let outcome = match &self.inference {
            Some(inference) => inference.predict(model, input).await,
            None => Err(MeshError::InferenceError(
                "no inference service configured".to_string(),
            )),
        };

        match outcome {
            Ok(output) => {
                self.predictions.fetch_add(1, Ordering::Relaxed);
                self.announce(
                    "prediction.completed",
                    json!({ "model": model, "output": output }),
                )
                .await;
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(%model, error = %e, "Prediction failed");
                self.announce(
                    "prediction.failed",
                    json!({ "model": model, "error": e.to_string() }),
                )
                .await;
                Err(e)
            }
        }
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let registry = self.registry.counts().await;
        let uptime_secs = lock(&self.started_at)
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let components = lock(&self.components).clone();
        let events = self.bus.stats();

        SystemStatus {
            state: self.state(),
            uptime_secs,
            registry,
            components,
            counters: StatusCounters {
                events_processed: events.processed,
                predictions_made: self.predictions.load(Ordering::Relaxed),
                requests_processed: self.requests_processed.load(Ordering::Relaxed),
                requests_failed: self.requests_failed.load(Ordering::Relaxed),
            },
            mesh: self.mesh.stats(),
            gateway: self.gateway.stats(),
            events,
        }
    }
}
