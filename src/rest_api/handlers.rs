//! HTTP handlers for the REST API

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::controller::ControllerState;

/// Body of `/health`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether this replica currently holds the leader lease
    pub leader: bool,
}

impl HealthResponse {
    pub fn new(leader: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            leader,
        }
    }
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<Arc<ControllerState>>) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.is_leader.load(Ordering::Relaxed)))
}

/// Prometheus scrape endpoint
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}
