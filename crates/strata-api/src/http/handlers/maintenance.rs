//! Maintenance sweep trigger and queue status.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use strata_types::maintenance::{MaintenanceStatus, SweepReport};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub counts: MaintenanceStatus,
    pub embedding_model: String,
    pub extractor: String,
    pub summarizer: String,
}

/// POST /api/v1/maintenance/sweep - Run one bounded sweep now.
///
/// Waits for an in-flight background sweep to finish first.
pub async fn run_sweep(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<SweepReport>>, AppError> {
    let timer = RequestTimer::start();
    let report = state.engine.run_maintenance_sweep().await?;
    Ok(Json(
        timer
            .finish(report)
            .with_link("status", "/api/v1/maintenance/status"),
    ))
}

/// GET /api/v1/maintenance/status - Queue depths and permanent failures.
pub async fn status(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<StatusView>>, AppError> {
    let timer = RequestTimer::start();
    let counts = state.engine.status().await?;
    let view = StatusView {
        counts,
        embedding_model: state.engine.embedder().model_name().to_string(),
        extractor: state.engine.extractor_name().to_string(),
        summarizer: state.engine.summarizer_name().to_string(),
    };
    Ok(Json(timer.finish(view).with_link("self", "/api/v1/maintenance/status")))
}
