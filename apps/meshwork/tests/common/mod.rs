//! Shared fixtures: a real upstream HTTP service on an ephemeral port.

#![allow(dead_code, clippy::unwrap_used)]

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::{Method, StatusCode},
    routing::{any, get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// An upstream service. Aborted on drop.
pub struct Upstream {
    pub url: String,
    pub port: u16,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl Upstream {
    /// Requests served, excluding `/health`.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for Upstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    RawQuery(query): RawQuery,
    body: String,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "method": method.as_str(), "query": query, "body": body }))
}

async fn slow(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

async fn boom(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, &'static str) {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn missing(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, Json<Value>) {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::NOT_FOUND, Json(json!({ "error": "no such user" })))
}

async fn user(State(hits): State<Arc<AtomicUsize>>, Path(id): Path<String>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": id, "name": "alice" }))
}

async fn predict(Json(request): Json<Value>) -> Json<Value> {
    Json(json!({ "model": request["model"], "prediction": 42 }))
}

pub async fn spawn_upstream() -> Upstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/echo", any(echo))
        .route("/api/slow", get(slow))
        .route("/api/boom", any(boom))
        .route("/users/missing", get(missing))
        .route("/users/{id}", get(user))
        .route("/predict", post(predict))
        .with_state(Arc::clone(&hits));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Upstream {
        url: format!("http://127.0.0.1:{}", port),
        port,
        hits,
        handle,
    }
}

/// A port nothing listens on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
