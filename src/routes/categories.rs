//! Category routes: CRUD scoped to the caller's rules.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::RequireAdmin;
use crate::models::category::{Category, CreateCategory, UpdateCategory};
use crate::AppState;

/// GET /api/v1/categories — list categories in display order.
pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<Category>>>, AppError> {
    let categories = state.store.list_categories(Some(user.id)).await?;
    Ok(ApiResponse::success(categories))
}

/// POST /api/v1/categories — create a category (admin).
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<CreateCategory>,
) -> Result<Json<ApiResponse<Category>>, AppError> {
    let category = state.store.create_category(admin.id, &body).await?;
    Ok(ApiResponse::success(category))
}

/// GET /api/v1/categories/{id} — get a category by ID.
pub async fn get_by_id(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Category>>, AppError> {
    let category = state.store.get_category(id, Some(user.id)).await?;
    Ok(ApiResponse::success(category))
}

/// PUT /api/v1/categories/{id} — update a category (admin).
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateCategory>,
) -> Result<Json<ApiResponse<Category>>, AppError> {
    let category = state.store.update_category(id, Some(admin.id), &body).await?;
    Ok(ApiResponse::success(category))
}

/// DELETE /api/v1/categories/{id} — delete a category; its responses
/// become uncategorized (admin).
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.store.delete_category(id, Some(admin.id)).await?;
    Ok(ApiResponse::success(()))
}
