//! Conversation archive handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use strata_types::archive::{ArchivedConversation, Conversation, Message, NewConversation, NewMessage};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::{ConversationListQuery, page_limit};
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("invalid {what} id: {raw}")))
}

/// POST /api/v1/conversations - Archive a conversation with its messages.
///
/// Returns once the conversation is stored; its messages become
/// searchable after the next maintenance sweep.
pub async fn create_conversation(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<NewConversation>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let timer = RequestTimer::start();

    let archived = state.engine.archive(body).await?;
    let id = archived.conversation.id;
    let data = serde_json::json!({
        "id": id,
        "message_count": archived.messages.len(),
        "status": archived.conversation.status,
    });

    Ok(Json(
        timer
            .finish(data)
            .with_link("self", format!("/api/v1/conversations/{id}")),
    ))
}

/// GET /api/v1/conversations - Conversation headers, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, AppError> {
    let timer = RequestTimer::start();

    let conversations = state
        .engine
        .list_conversations(query.owner.as_deref(), query.status()?, page_limit(query.limit))
        .await?;

    Ok(Json(timer.finish(conversations).with_link("self", "/api/v1/conversations")))
}

/// GET /api/v1/conversations/{id} - Conversation with messages in order.
pub async fn get_conversation(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ArchivedConversation>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id, "conversation")?;

    let conversation = state.engine.get_conversation(&id).await?;

    Ok(Json(
        timer
            .finish(conversation)
            .with_link("self", format!("/api/v1/conversations/{id}")),
    ))
}

/// POST /api/v1/conversations/{id}/messages - Append to an active conversation.
pub async fn append_message(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
    Json(body): Json<NewMessage>,
) -> Result<Json<ApiResponse<Message>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id, "conversation")?;

    let message = state.engine.append(&id, body).await?;

    Ok(Json(
        timer
            .finish(message)
            .with_link("conversation", format!("/api/v1/conversations/{id}")),
    ))
}

/// Body of a project reassignment. A missing or null `project` means general.
#[derive(Debug, Deserialize)]
pub struct ReassignProject {
    #[serde(default)]
    pub project: Option<String>,
}

/// PUT /api/v1/conversations/{id}/project - Move a conversation between projects.
pub async fn reassign_project(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
    Json(body): Json<ReassignProject>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id, "conversation")?;

    let conversation = state
        .engine
        .reassign_project(&id, body.project.as_deref())
        .await?;

    Ok(Json(
        timer
            .finish(conversation)
            .with_link("conversation", format!("/api/v1/conversations/{id}")),
    ))
}

/// POST /api/v1/messages/{id}/reembed - Queue a message for re-embedding.
pub async fn reembed_message(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id, "message")?;

    state.engine.reembed_message(&id).await?;

    Ok(Json(timer.finish(serde_json::json!({ "id": id, "embedding_status": "pending" }))))
}
