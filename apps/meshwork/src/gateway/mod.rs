//! # API Gateway
//!
//! The HTTP edge. For every request:
//!
//! 1. resolve the route (longest prefix, then method): 404 / 405
//! 2. sliding-window rate limit per `(client_ip, route)`: 429
//! 3. the service's circuit breaker: 503 without touching the network
//! 4. weighted-random pick among HEALTHY endpoints: 503 if none
//! 5. forward method, path, query, end-to-end headers and body;
//!    timeout gives 504 and other transport errors 502
//!
//! The gateway never serves fallback payloads; failures are plain HTTP
//! errors. Its endpoints and breakers are independent of the mesh.

mod endpoint;
mod router;

pub use endpoint::{EndpointStatus, ServiceEndpoint};
pub use router::{router, serve_gateway};

use crate::config::GatewayConfig;
use axum::body::Bytes;
use meshwork_core::{
    CircuitBreaker, CircuitBreakerConfig, MeshError, RateDecision, RouteConfig, RouteMatch,
    RouteTable, SlidingWindowLimiter, weighted_index,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Headers that describe one hop and are never copied across.
const HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// A request arriving at the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub client_ip: String,
}

impl GatewayRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: Bytes::new(),
            client_ip: "unknown".to_string(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn from_client(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }
}

/// The edge's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl GatewayResponse {
    fn error(status: u16, message: impl Into<String>) -> Self {
        let body = json!({ "error": message.into(), "status": status });
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
        }
    }

    /// First value of header `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// =============================================================================
// COUNTERS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub requests: u64,
    pub forwarded: u64,
    pub rate_limited: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    forwarded: AtomicU64,
    rate_limited: AtomicU64,
    errors: AtomicU64,
}

// =============================================================================
// GATEWAY
// =============================================================================

pub struct ApiGateway {
    config: GatewayConfig,
    breaker_config: CircuitBreakerConfig,
    routes: RwLock<RouteTable>,
    endpoints: RwLock<HashMap<String, Vec<ServiceEndpoint>>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    limiter: SlidingWindowLimiter,
    client: reqwest::Client,
    counters: Counters,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ApiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiGateway {
    #[must_use]
    pub fn new(config: GatewayConfig, breaker_config: CircuitBreakerConfig) -> Self {
        let window = Duration::from_secs(config.rate_limit_window_secs.max(1));
        Self {
            config,
            breaker_config,
            routes: RwLock::new(RouteTable::new()),
            endpoints: RwLock::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            limiter: SlidingWindowLimiter::new(window),
            client: reqwest::Client::new(),
            counters: Counters::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn routes_read(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.routes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn routes_write(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.routes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn endpoints_read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<ServiceEndpoint>>> {
        self.endpoints.read().unwrap_or_else(|e| e.into_inner())
    }

    fn endpoints_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<ServiceEndpoint>>> {
        self.endpoints.write().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------------
    // Routes & endpoints
    // -------------------------------------------------------------------------

    pub fn add_route(&self, route: RouteConfig) -> Result<(), MeshError> {
        tracing::info!(path = %route.path, service = %route.service_name, "Route added");
        self.routes_write().add_route(route)
    }

    /// Remove every route targeting `service_name`.
    pub fn remove_routes_for(&self, service_name: &str) -> usize {
        self.routes_write().remove_for_service(service_name)
    }

    #[must_use]
    pub fn routes(&self) -> Vec<RouteConfig> {
        self.routes_read().routes().to_vec()
    }

    /// Add an endpoint, replacing one with the same service and URL.
    pub fn add_endpoint(&self, endpoint: ServiceEndpoint) {
        tracing::info!(service = %endpoint.service_name, url = %endpoint.url, "Endpoint added");
        let mut endpoints = self.endpoints_write();
        let list = endpoints.entry(endpoint.service_name.clone()).or_default();
        list.retain(|e| e.url != endpoint.url);
        list.push(endpoint);
    }

    pub fn remove_endpoint(&self, service_name: &str, url: &str) -> bool {
        let url = url.trim_end_matches('/');
        let mut endpoints = self.endpoints_write();
        let Some(list) = endpoints.get_mut(service_name) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.url != url);
        let removed = list.len() != before;
        if list.is_empty() {
            endpoints.remove(service_name);
        }
        removed
    }

    #[must_use]
    pub fn endpoints(&self, service_name: &str) -> Vec<ServiceEndpoint> {
        self.endpoints_read()
            .get(service_name)
            .cloned()
            .unwrap_or_default()
    }

    /// The breaker guarding `service_name`, created on first use.
    pub fn breaker_for(&self, service_name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service_name, self.breaker_config)))
            .clone()
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Request handling
    // -------------------------------------------------------------------------

    fn fail(&self, status: u16, message: impl Into<String>) -> GatewayResponse {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        GatewayResponse::error(status, message)
    }

    fn select_endpoint(&self, service_name: &str) -> Option<ServiceEndpoint> {
        let endpoints = self.endpoints_read();
        let healthy: Vec<&ServiceEndpoint> = endpoints
            .get(service_name)?
            .iter()
            .filter(|e| e.is_healthy())
            .collect();
        let weights: Vec<u32> = healthy.iter().map(|e| e.weight).collect();
        weighted_index(&weights)
            .and_then(|i| healthy.get(i))
            .map(|e| (*e).clone())
    }

    fn endpoint_failed(&self, service_name: &str, url: &str) {
        let threshold = self.config.endpoint_failure_threshold;
        let mut endpoints = self.endpoints_write();
        if let Some(endpoint) = endpoints
            .get_mut(service_name)
            .and_then(|list| list.iter_mut().find(|e| e.url == url))
        {
            if endpoint.record_failure(threshold) {
                tracing::warn!(service = %service_name, %url, "Endpoint marked unhealthy");
            }
        }
    }

    fn endpoint_succeeded(&self, service_name: &str, url: &str) {
        let mut endpoints = self.endpoints_write();
        if let Some(endpoint) = endpoints
            .get_mut(service_name)
            .and_then(|list| list.iter_mut().find(|e| e.url == url))
        {
            endpoint.record_success();
        }
    }

    /// Handle one edge request.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let route = match self.routes_read().resolve(&request.method, &request.path) {
            RouteMatch::Matched(route) => route.clone(),
            RouteMatch::MethodNotAllowed => {
                return self.fail(405, format!("method {} not allowed", request.method));
            }
            RouteMatch::NotFound => {
                return self.fail(404, format!("no route for {}", request.path));
            }
        };

        let limit = route.rate_limit.unwrap_or(self.config.default_rate_limit);
        if let RateDecision::Limited { retry_after } =
            self.limiter.check(&request.client_ip, &route.path, limit)
        {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(client = %request.client_ip, route = %route.path, "Rate limited");
            let mut response = GatewayResponse::error(429, "rate limit exceeded");
            response
                .headers
                .push(("retry-after".to_string(), retry_after.as_secs().max(1).to_string()));
            return response;
        }

        let breaker = self.breaker_for(&route.service_name);
        if !breaker.call_allowed() {
            return self.fail(
                503,
                format!("circuit breaker open for {}", route.service_name),
            );
        }

        let Some(endpoint) = self.select_endpoint(&route.service_name) else {
            return self.fail(
                503,
                format!("no healthy endpoints for {}", route.service_name),
            );
        };

        let timeout = Duration::from_millis(
            route
                .timeout_ms
                .unwrap_or(self.config.default_timeout_ms),
        );
        self.forward(&route, &endpoint, request, timeout, &breaker)
            .await
    }

    async fn forward(
        &self,
        route: &RouteConfig,
        endpoint: &ServiceEndpoint,
        request: GatewayRequest,
        timeout: Duration,
        breaker: &CircuitBreaker,
    ) -> GatewayResponse {
        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => return self.fail(405, format!("invalid method {}", request.method)),
        };
        let mut url = format!("{}{}", endpoint.url, request.path);
        if let Some(query) = &request.query {
            url.push('?');
            url.push_str(query);
        }

        let mut outbound = self.client.request(method, &url).timeout(timeout);
        for (name, value) in &request.headers {
            if HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            outbound = outbound.header(name.as_str(), value.as_str());
        }
        outbound = outbound.body(request.body);

        match outbound.send().await {
            Ok(response) => {
                breaker.record_success();
                self.endpoint_succeeded(&route.service_name, &endpoint.url);
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);

                let status = response.status().as_u16();
                let headers: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                match response.bytes().await {
                    Ok(body) => GatewayResponse {
                        status,
                        headers,
                        body,
                    },
                    Err(e) => self.fail(502, format!("upstream body error: {}", e)),
                }
            }
            Err(e) => {
                breaker.record_failure();
                self.endpoint_failed(&route.service_name, &endpoint.url);
                if e.is_timeout() {
                    tracing::warn!(service = %route.service_name, %url, "Upstream timed out");
                    self.fail(504, "upstream timed out")
                } else {
                    tracing::warn!(service = %route.service_name, %url, error = %e, "Upstream unreachable");
                    self.fail(502, "upstream unreachable")
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Background maintenance
    // -------------------------------------------------------------------------

    /// Probe every UNHEALTHY endpoint's `/health`; a 2xx restores it.
    /// Returns how many endpoints were restored.
    pub async fn probe_endpoints(&self) -> usize {
        let unhealthy: Vec<(String, String)> = self
            .endpoints_read()
            .values()
            .flatten()
            .filter(|e| !e.is_healthy())
            .map(|e| (e.service_name.clone(), e.url.clone()))
            .collect();

        let mut restored = 0;
        for (service, url) in unhealthy {
            let healthy = matches!(
                self.client
                    .get(format!("{}/health", url))
                    .timeout(PROBE_TIMEOUT)
                    .send()
                    .await,
                Ok(response) if response.status().is_success()
            );

            let mut endpoints = self.endpoints_write();
            let Some(endpoint) = endpoints
                .get_mut(&service)
                .and_then(|list| list.iter_mut().find(|e| e.url == url))
            else {
                continue;
            };
            if healthy {
                endpoint.restore();
                restored += 1;
                tracing::info!(%service, %url, "Endpoint restored");
            } else {
                endpoint.last_checked = Some(chrono::Utc::now());
            }
        }
        restored
    }

    /// Drop expired rate-limit keys.
    pub fn purge_rate_limits(&self) -> usize {
        self.limiter.purge_expired()
    }

    /// Start the endpoint probe and rate-limit purge loops.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks();
        if !tasks.is_empty() {
            return;
        }

        let gateway = Arc::clone(self);
        let probe_every = Duration::from_secs(self.config.probe_interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_every);
            loop {
                ticker.tick().await;
                gateway.probe_endpoints().await;
            }
        }));

        let gateway = Arc::clone(self);
        let purge_every = Duration::from_secs(self.config.purge_interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(purge_every);
            loop {
                ticker.tick().await;
                let purged = gateway.purge_rate_limits();
                if purged > 0 {
                    tracing::debug!(purged, "Purged rate-limit keys");
                }
            }
        }));
        tracing::info!("Gateway maintenance loops started");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        let tasks = self.tasks();
        !tasks.is_empty() && tasks.iter().all(|t| !t.is_finished())
    }

    pub fn stop(&self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}
