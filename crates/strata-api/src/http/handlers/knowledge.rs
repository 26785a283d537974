//! Read-only views over the knowledge graph and summary digests.

use axum::Json;
use axum::extract::{Query, State};

use strata_types::digest::SummaryDigest;
use strata_types::knowledge::KnowledgeFact;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::{DigestListQuery, FactListQuery, page_limit};
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// GET /api/v1/facts - Knowledge facts, most confident first.
pub async fn list_facts(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<FactListQuery>,
) -> Result<Json<ApiResponse<Vec<KnowledgeFact>>>, AppError> {
    let timer = RequestTimer::start();
    let facts = state
        .engine
        .list_facts(query.kind()?, page_limit(query.limit))
        .await?;
    Ok(Json(timer.finish(facts).with_link("self", "/api/v1/facts")))
}

/// GET /api/v1/digests - Summary digests, newest first.
pub async fn list_digests(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<DigestListQuery>,
) -> Result<Json<ApiResponse<Vec<SummaryDigest>>>, AppError> {
    let timer = RequestTimer::start();
    let digests = state
        .engine
        .list_digests(query.owner.as_deref(), page_limit(query.limit))
        .await?;
    Ok(Json(timer.finish(digests).with_link("self", "/api/v1/digests")))
}
