//! # API Endpoint Handlers

use super::{
    AppState,
    types::{DiscoverQuery, HealthResponse, InstanceResponse, RegisterResponse, ServicesResponse},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use meshwork_core::{InstanceId, MeshError, ServiceRegistration};

fn error_status(error: &MeshError) -> StatusCode {
    match error {
        MeshError::InvalidRegistration(_)
        | MeshError::InvalidRequest(_)
        | MeshError::InvalidRoute(_) => StatusCode::BAD_REQUEST,
        MeshError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse::new(state.orchestrator.state().as_str()))
}

/// Full system status of the orchestrator.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.orchestrator.get_system_status().await;
    (StatusCode::OK, Json(status))
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// Every registered instance, in service-name order.
pub async fn list_services_handler(State(state): State<AppState>) -> impl IntoResponse {
    let services = state.orchestrator.registry().list().await;
    (StatusCode::OK, Json(ServicesResponse::new(services)))
}

/// Instances of one service. Healthy only unless `?healthy_only=false`.
pub async fn discover_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DiscoverQuery>,
) -> impl IntoResponse {
    let services = state
        .orchestrator
        .registry()
        .discover(&name, query.healthy_only)
        .await;
    (StatusCode::OK, Json(ServicesResponse::new(services)))
}

// =============================================================================
// REGISTRATION
// =============================================================================

pub async fn register_handler(
    State(state): State<AppState>,
    Json(registration): Json<ServiceRegistration>,
) -> impl IntoResponse {
    match state.orchestrator.register_service(registration).await {
        Ok(instance) => (
            StatusCode::CREATED,
            Json(RegisterResponse::success(instance)),
        ),
        Err(e) => (
            error_status(&e),
            Json(RegisterResponse::error(format!("Registration failed: {}", e))),
        ),
    }
}

pub async fn deregister_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match InstanceId::parse(&id) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(InstanceResponse::error(e.to_string())),
            );
        }
    };

    match state.orchestrator.deregister_service(&id).await {
        Ok(true) => (StatusCode::OK, Json(InstanceResponse::success(id))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(InstanceResponse::error(format!("Instance {} not found", id))),
        ),
        Err(e) => (error_status(&e), Json(InstanceResponse::error(e.to_string()))),
    }
}

pub async fn heartbeat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match InstanceId::parse(&id) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(InstanceResponse::error(e.to_string())),
            );
        }
    };

    match state.orchestrator.registry().heartbeat(&id).await {
        Ok(true) => (StatusCode::OK, Json(InstanceResponse::success(id))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(InstanceResponse::error(format!("Instance {} not found", id))),
        ),
        Err(e) => (error_status(&e), Json(InstanceResponse::error(e.to_string()))),
    }
}
