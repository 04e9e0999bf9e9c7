//! Health check endpoints for liveness and readiness probes.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::errors::ApiResponse;
use crate::AppState;

/// Readiness probe detail.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub delivery: String,
    pub running_tasks: usize,
}

/// Liveness probe — always returns OK if the process is running.
pub async fn live() -> &'static str {
    "OK"
}

/// Readiness probe — checks database connectivity when one is configured.
pub async fn ready(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let db_status = match &state.db {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "connected".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                format!("error: {e}")
            }
        },
        None => "in-memory".to_string(),
    };

    let delivery = if state.config.gateway_url.is_some() {
        "gateway"
    } else {
        "log-only"
    };

    ApiResponse::success(HealthStatus {
        status: "ok".to_string(),
        database: db_status,
        delivery: delivery.to_string(),
        running_tasks: state.engine.running_tasks(),
    })
}
