//! Quick response routes: CRUD, pause toggle, and manual execution.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::RequireAdmin;
use crate::models::response::{CreateResponse, QuickResponse, ResponseFilters, UpdateResponse};
use crate::models::run::Run;
use crate::AppState;

/// Query parameters for listing responses.
#[derive(Debug, Deserialize)]
pub struct ResponseQuery {
    pub category_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub is_paused: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub cancelled_runs: usize,
}

/// GET /api/v1/responses — list the caller's responses with filters.
pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ResponseQuery>,
) -> Result<Json<ApiResponse<Vec<QuickResponse>>>, AppError> {
    let filters = ResponseFilters {
        owner_id: Some(user.id),
        category_id: query.category_id,
        is_active: query.is_active,
        is_paused: query.is_paused,
    };
    let responses = state.store.list_responses(&filters).await?;
    Ok(ApiResponse::success(responses))
}

/// POST /api/v1/responses — create a response with its actions (admin).
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<CreateResponse>,
) -> Result<Json<ApiResponse<QuickResponse>>, AppError> {
    let response = state.store.create_response(admin.id, &body).await?;
    Ok(ApiResponse::success(response))
}

/// GET /api/v1/responses/{id} — get a response with its actions.
pub async fn get_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<QuickResponse>>, AppError> {
    let response = state.store.get_response(id, Some(user.id)).await?;
    Ok(ApiResponse::success(response))
}

/// PUT /api/v1/responses/{id} — partial update; `actions` replaces the list (admin).
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateResponse>,
) -> Result<Json<ApiResponse<QuickResponse>>, AppError> {
    let response = state.store.update_response(id, Some(admin.id), &body).await?;
    Ok(ApiResponse::success(response))
}

/// DELETE /api/v1/responses/{id} — delete and cancel in-flight runs (admin).
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeleteResult>>, AppError> {
    let cancelled_runs = state.engine.delete_rule(id, Some(admin.id)).await?;
    Ok(ApiResponse::success(DeleteResult { cancelled_runs }))
}

/// POST /api/v1/responses/{id}/toggle-pause — flip the paused flag (admin).
pub async fn toggle_pause(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<QuickResponse>>, AppError> {
    let response = state.store.toggle_pause(id, Some(admin.id)).await?;
    Ok(ApiResponse::success(response))
}

/// POST /api/v1/responses/{id}/execute — run now against a conversation (admin).
pub async fn execute(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<ApiResponse<Run>>, AppError> {
    let conversation_id = body.conversation_id.trim();
    if conversation_id.is_empty() {
        return Err(AppError::validation(
            "conversation_id",
            "conversation_id must not be empty",
        ));
    }
    let run = state
        .engine
        .execute_now(id, conversation_id, Some(admin.id))
        .await?;
    Ok(ApiResponse::success(run))
}
