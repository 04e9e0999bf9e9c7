//! Inbound event webhook for the messaging gateway.

use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::rbac::RequireGateway;
use crate::services::engine::EventOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub text: String,
    /// Only evaluate this owner's rules.
    pub owner_id: Option<Uuid>,
}

/// POST /api/v1/events/inbound — evaluate an inbound message (gateway/admin).
///
/// Runs execute in the background; the response reports what was scheduled.
pub async fn inbound(
    State(state): State<AppState>,
    RequireGateway(_caller): RequireGateway,
    Json(body): Json<InboundMessage>,
) -> Result<Json<ApiResponse<EventOutcome>>, AppError> {
    let conversation_id = body.conversation_id.trim();
    if conversation_id.is_empty() {
        return Err(AppError::validation(
            "conversation_id",
            "conversation_id must not be empty",
        ));
    }
    let outcome = state
        .engine
        .inbound_message(conversation_id, &body.text, body.owner_id)
        .await?;
    Ok(ApiResponse::success(outcome))
}
