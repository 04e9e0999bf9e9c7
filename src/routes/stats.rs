//! Execution statistics route.

use axum::{extract::State, Json};
use chrono::Utc;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::services::stats::{self as stats_service, ExecutionStats};
use crate::AppState;

/// GET /api/v1/stats — rule and run counts for the caller.
pub async fn get(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<ExecutionStats>>, AppError> {
    let stats =
        stats_service::get_stats(&state.store, state.runs.as_ref(), Some(user.id), Utc::now())
            .await?;
    Ok(ApiResponse::success(stats))
}
