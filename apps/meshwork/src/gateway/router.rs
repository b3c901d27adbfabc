//! axum glue for the gateway: every request falls through to one handler
//! that converts it into a [`GatewayRequest`].

use super::{ApiGateway, GatewayRequest, GatewayResponse};
use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use meshwork_core::MeshError;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Largest request body the gateway will buffer and forward.
const MAX_FORWARD_BODY: usize = 10 * 1024 * 1024;

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.append(name, value);
            }
        }
        response
    }
}

/// The socket peer, or the first `x-forwarded-for` address when the
/// gateway trusts its proxy.
fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
        {
            let forwarded = forwarded.trim();
            if !forwarded.is_empty() {
                return forwarded.to_string();
            }
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn proxy_handler(State(gateway): State<Arc<ApiGateway>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_FORWARD_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };

    let request = GatewayRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body,
        client_ip: client_ip(&parts, gateway.config().trust_forwarded_for),
    };

    gateway.handle(request).await.into_response()
}

/// Router that sends every request through the gateway.
pub fn router(gateway: Arc<ApiGateway>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(gateway)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve the gateway on an already bound listener.
pub async fn serve_gateway(
    listener: tokio::net::TcpListener,
    gateway: Arc<ApiGateway>,
) -> Result<(), MeshError> {
    let app = router(gateway).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .await
        .map_err(|e| MeshError::IoError(format!("Gateway server error: {}", e)))
}

