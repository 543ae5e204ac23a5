//! Liveness endpoint.

use axum::Json;

use crate::models::HealthResponse;

/// `GET /api/health`: process is up and serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: agora_core::version().to_string(),
    })
}
