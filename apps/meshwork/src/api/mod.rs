//! # Registry HTTP API
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness plus orchestrator state
//! - `GET /status` - Full system status
//! - `GET /services` - All registered instances
//! - `GET /services/{name}` - Discover a service (`?healthy_only=false` for all)
//! - `POST /services/register` - Register an instance (201)
//! - `DELETE /services/{id}` - Deregister an instance
//! - `POST /services/{id}/heartbeat` - Refresh an instance heartbeat
//!
//! ## Configuration
//!
//! - `registry.cors_origins` / `MESHWORK_CORS_ORIGINS`: comma-separated
//!   origins, or "*" for all (default: localhost only)
//! - `registry.api_rate_limit` / `MESHWORK_RATE_LIMIT`: requests per second
//!   (0 disables)

mod handlers;
mod middleware;
mod types;

pub use handlers::{
    deregister_handler, discover_handler, health_handler, heartbeat_handler,
    list_services_handler, register_handler, status_handler,
};
pub use middleware::{GlobalRateLimiter, create_rate_limiter};
pub use types::{
    DiscoverQuery, HealthResponse, InstanceResponse, RegisterResponse, ServicesResponse,
};

use crate::orchestrator::Orchestrator;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use meshwork_core::MeshError;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const MAX_BODY_BYTES: usize = 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from configured origins.
///
/// - `"*"`: any origin
/// - unset: localhost only
/// - otherwise: the comma-separated list
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                with_allowed(CorsLayer::new().allow_origin(allowed))
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    with_allowed(CorsLayer::new().allow_origin(origins))
}

fn with_allowed(layer: CorsLayer) -> CorsLayer {
    layer
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the registry router.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit, rate limit.
pub fn create_router(state: AppState) -> Router {
    let config = &state.orchestrator.config().registry;
    let cors = build_cors_layer(config.cors_origins.as_deref());
    let rate_limit = config.api_rate_limit;

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/services", get(handlers::list_services_handler))
        .route("/services/register", post(handlers::register_handler))
        // GET takes a service name, DELETE an instance id.
        .route(
            "/services/{key}",
            get(handlers::discover_handler).delete(handlers::deregister_handler),
        )
        .route("/services/{key}/heartbeat", post(handlers::heartbeat_handler));

    if rate_limit > 0 {
        tracing::info!("Registry rate limiting enabled: {} requests/second", rate_limit);
        router = router.layer(axum_middleware::from_fn_with_state(
            create_rate_limiter(rate_limit),
            middleware::rate_limit_middleware,
        ));
    } else {
        tracing::info!("Registry rate limiting disabled");
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the registry API on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), MeshError> {
    axum::serve(listener, create_router(state))
        .await
        .map_err(|e| MeshError::IoError(format!("Server error: {}", e)))
}
