//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/` except `/health`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Archive
        .route(
            "/conversations",
            post(handlers::conversations::create_conversation)
                .get(handlers::conversations::list_conversations),
        )
        .route("/conversations/{id}", get(handlers::conversations::get_conversation))
        .route(
            "/conversations/{id}/messages",
            post(handlers::conversations::append_message),
        )
        .route(
            "/conversations/{id}/project",
            put(handlers::conversations::reassign_project),
        )
        .route("/messages/{id}/reembed", post(handlers::conversations::reembed_message))
        // Retrieval
        .route("/search", post(handlers::search::search))
        .route("/retrieve", post(handlers::search::retrieve))
        // Knowledge + summaries
        .route("/facts", get(handlers::knowledge::list_facts))
        .route("/digests", get(handlers::knowledge::list_digests))
        // Maintenance
        .route("/maintenance/sweep", post(handlers::maintenance::run_sweep))
        .route("/maintenance/status", get(handlers::maintenance::status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
