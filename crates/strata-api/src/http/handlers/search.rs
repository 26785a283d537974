//! Semantic search and unified retrieval handlers.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use strata_types::search::{RetrievalBundle, RetrieveRequest, SearchResults, SearchScope};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub scope: SearchScope,
}

fn default_k() -> usize {
    5
}

/// POST /api/v1/search - Top-k messages by similarity, with related facts.
pub async fn search(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<SearchRequest>,
) -> Result<Json<ApiResponse<SearchResults>>, AppError> {
    let timer = RequestTimer::start();

    let results = state.engine.search(&body.query, body.k, &body.scope).await?;

    Ok(Json(timer.finish(results).with_link("self", "/api/v1/search")))
}

/// POST /api/v1/retrieve - Messages, facts and digests for one query.
pub async fn retrieve(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<RetrieveRequest>,
) -> Result<Json<ApiResponse<RetrievalBundle>>, AppError> {
    let timer = RequestTimer::start();

    let bundle = state.engine.retrieve(&body).await?;

    Ok(Json(timer.finish(bundle).with_link("self", "/api/v1/retrieve")))
}
