//! GET /health - liveness check (no auth required).

use axum::Json;
use axum::extract::State;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "embedding_model": state.engine.embedder().model_name(),
        "auth": state.auth_enabled(),
    }))
}
