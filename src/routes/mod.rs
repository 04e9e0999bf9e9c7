//! Route definitions for the quick responses API.

pub mod categories;
pub mod conversations;
pub mod events;
pub mod health;
pub mod responses;
pub mod runs;
pub mod stats;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let origin = match state.config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => {
            tracing::warn!(frontend_url = %state.config.frontend_url, "Invalid FRONTEND_URL, allowing any origin");
            AllowOrigin::any()
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    let category_routes = Router::new()
        .route(
            "/categories",
            get(categories::list).post(categories::create),
        )
        .route(
            "/categories/{id}",
            get(categories::get_by_id)
                .put(categories::update)
                .delete(categories::delete),
        );

    let response_routes = Router::new()
        .route("/responses", get(responses::list).post(responses::create))
        .route(
            "/responses/{id}",
            get(responses::get_by_id)
                .put(responses::update)
                .delete(responses::delete),
        )
        .route(
            "/responses/{id}/toggle-pause",
            post(responses::toggle_pause),
        )
        .route("/responses/{id}/execute", post(responses::execute));

    let engine_routes = Router::new()
        .route("/events/inbound", post(events::inbound))
        .route("/conversations/{id}/end", post(conversations::end))
        .route("/runs", get(runs::list))
        .route("/runs/{id}", get(runs::get_by_id))
        .route("/stats", get(stats::get));

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .nest("/api/v1", category_routes)
        .nest("/api/v1", response_routes)
        .nest("/api/v1", engine_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
