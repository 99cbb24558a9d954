//! Health check endpoint

use std::collections::HashMap;

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::warn;

use crate::api::state::ApiState;
use crate::storage::HealthStatus;

/// GET /api/health
///
/// Reports the storage backend's health; 503 when it is not operational.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let health = match state.store().health_check().await {
        Ok(health) => health,
        Err(e) => {
            warn!("storage health check failed: {}", e);
            HealthStatus {
                healthy: false,
                message: e.to_string(),
                metadata: HashMap::new(),
            }
        }
    };

    let code = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": if health.healthy { "ok" } else { "unhealthy" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "storage": {
                "message": health.message,
                "metadata": health.metadata,
            },
        })),
    )
}
