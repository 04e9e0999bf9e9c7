//! Conversation lifecycle routes.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::rbac::RequireGateway;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EndResult {
    pub cancelled_runs: usize,
}

/// POST /api/v1/conversations/{id}/end — close a conversation and cancel its runs.
pub async fn end(
    State(state): State<AppState>,
    RequireGateway(_caller): RequireGateway,
    Path(conversation_id): Path<String>,
) -> Result<Json<ApiResponse<EndResult>>, AppError> {
    let cancelled_runs = state.engine.end_conversation(&conversation_id).await?;
    Ok(ApiResponse::success(EndResult { cancelled_runs }))
}
