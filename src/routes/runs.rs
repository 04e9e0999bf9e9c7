//! Run history routes.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::run::{Run, RunFilters};
use crate::AppState;

/// GET /api/v1/runs — paginated run history, newest first.
pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<Pagination>,
    Query(mut filters): Query<RunFilters>,
) -> Result<Json<ApiResponse<PagedResult<Run>>>, AppError> {
    filters.owner_id = Some(user.id);
    let (runs, total) = state.runs.list_runs(&filters, &pagination).await?;
    Ok(ApiResponse::success(PagedResult::new(runs, total, &pagination)))
}

/// GET /api/v1/runs/{id} — get a run with its cursor and failure reason.
pub async fn get_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Run>>, AppError> {
    let run = state
        .runs
        .get_run(id)
        .await?
        .filter(|r| r.owner_id == user.id)
        .ok_or_else(|| AppError::NotFound(format!("Run {id} not found")))?;
    Ok(ApiResponse::success(run))
}
