//! Template, loopback, health, and metrics routes

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{success, ApiError, Envelope};
use crate::extract::{JsonOrForm, QueryParams};
use crate::AppState;

/// Reload the configured message template
pub async fn reload_template(State(state): State<Arc<AppState>>) -> Result<Json<Envelope<String>>, ApiError> {
    match &state.template_path {
        Some(path) => {
            state.renderer.load_from_path(path)?;
            Ok(success(format!("reloaded {}", path.display())))
        }
        None => {
            state.renderer.load_default();
            Ok(success("reloaded default template".to_string()))
        }
    }
}

fn loopback(params: HashMap<String, String>) -> Json<Envelope<String>> {
    let message = params.get("message").cloned().unwrap_or_default();
    info!("Loopback message received:\n{}", message);
    success(message)
}

/// Loopback receiver for smoke-testing targets (query string)
pub async fn loopback_get(QueryParams(params): QueryParams<HashMap<String, String>>) -> Json<Envelope<String>> {
    loopback(params)
}

/// Loopback receiver for smoke-testing targets (form or JSON body)
pub async fn loopback_post(
    JsonOrForm(params): JsonOrForm<HashMap<String, String>>,
) -> Json<Envelope<String>> {
    loopback(params)
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue: QueueStatus,
    pub mute_rules: usize,
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub capacity: usize,
    pub pending: usize,
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        queue: QueueStatus {
            capacity: state.queue.capacity(),
            pending: state.queue.pending(),
        },
        mute_rules: state.mute.len(),
        targets: state.targets.levels().into_iter().map(String::from).collect(),
    })
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::OK, String::new()),
    }
}
