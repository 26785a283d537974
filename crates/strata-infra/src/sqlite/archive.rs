//! SQLite archive repository implementation.
//!
//! Implements `ArchiveRepository` from `strata-core` using sqlx with split
//! read/write pools. Conversation creation and message appends run in a
//! single writer transaction. Status columns on `messages` are the
//! embedding and extraction work queues; every transition is a guarded
//! `UPDATE ... WHERE status IN (...)` so a stale sweep cannot clobber a
//! newer state. Ready vectors are mirrored into the `message_vectors_*`
//! KNN tables in the same transaction that flips the status.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use strata_core::embedding::vector::vec_to_blob;
use strata_core::repository::{ArchiveRepository, ExtractionWork};
use strata_core::tokens::count_tokens;
use strata_types::archive::{
    ArchivedConversation, Conversation, ConversationStatus, EmbeddingSource, EmbeddingStatus,
    ExtractionStatus, Message, NewConversation, NewMessage,
};
use strata_types::error::RepositoryError;
use strata_types::knowledge::CandidateFact;
use strata_types::maintenance::MaintenanceStatus;
use strata_types::search::{ScoredMessage, SearchScope};

use super::pool::DatabasePool;
use super::vector::{self, KnnWindow, VectorIndex};
use super::{format_datetime, parse_datetime, parse_uuid, placeholders, query_error};

const CONVERSATION_COLUMNS: &str = "id, owner, project, title, status, compaction_attempts, \
     last_error, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, position, role, content, token_count, created_at, \
     embedding_status, embedding_source, embedding_attempts, extraction_status, \
     extraction_attempts, last_error";

/// SQLite-backed implementation of `ArchiveRepository`.
pub struct SqliteArchiveRepository {
    pool: DatabasePool,
}

impl SqliteArchiveRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Explain why a guarded message update touched no rows.
    async fn missing_or_conflict(&self, id: &Uuid, conflict: &str) -> RepositoryError {
        let exists = sqlx::query("SELECT 1 FROM messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await;
        match exists {
            Ok(Some(_)) => RepositoryError::Conflict(format!("message {id}: {conflict}")),
            Ok(None) => RepositoryError::NotFound,
            Err(e) => query_error(e),
        }
    }

    async fn load_messages(&self, conversation_id: &Uuid) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? ORDER BY position"
        ))
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| MessageRow::from_row(r).map_err(query_error)?.into_message())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    owner: String,
    project: Option<String>,
    title: Option<String>,
    status: String,
    compaction_attempts: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            project: row.try_get("project")?,
            title: row.try_get("title")?,
            status: row.try_get("status")?,
            compaction_attempts: row.try_get("compaction_attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        Ok(Conversation {
            id: parse_uuid(&self.id, "conversation id")?,
            owner: self.owner,
            project: self.project,
            title: self.title,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            compaction_attempts: self.compaction_attempts as u32,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    position: i64,
    role: String,
    content: String,
    token_count: i64,
    created_at: String,
    embedding_status: String,
    embedding_source: Option<String>,
    embedding_attempts: i64,
    extraction_status: String,
    extraction_attempts: i64,
    last_error: Option<String>,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            position: row.try_get("position")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            token_count: row.try_get("token_count")?,
            created_at: row.try_get("created_at")?,
            embedding_status: row.try_get("embedding_status")?,
            embedding_source: row.try_get("embedding_source")?,
            embedding_attempts: row.try_get("embedding_attempts")?,
            extraction_status: row.try_get("extraction_status")?,
            extraction_attempts: row.try_get("extraction_attempts")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let embedding_source = self
            .embedding_source
            .as_deref()
            .map(str::parse::<EmbeddingSource>)
            .transpose()
            .map_err(RepositoryError::Query)?;

        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            conversation_id: parse_uuid(&self.conversation_id, "conversation_id")?,
            position: self.position as u32,
            role: self.role.parse().map_err(RepositoryError::Query)?,
            content: self.content,
            token_count: self.token_count as u32,
            created_at: parse_datetime(&self.created_at)?,
            embedding: None,
            embedding_status: self.embedding_status.parse().map_err(RepositoryError::Query)?,
            embedding_source,
            embedding_attempts: self.embedding_attempts as u32,
            extraction_status: self.extraction_status.parse().map_err(RepositoryError::Query)?,
            extraction_attempts: self.extraction_attempts as u32,
            last_error: self.last_error,
        })
    }
}

fn new_message(conversation_id: Uuid, position: u32, input: &NewMessage, now: DateTime<Utc>) -> Message {
    Message {
        id: Uuid::now_v7(),
        conversation_id,
        position,
        role: input.role,
        content: input.content.clone(),
        token_count: count_tokens(&input.content),
        created_at: input.created_at.unwrap_or(now),
        embedding: None,
        embedding_status: EmbeddingStatus::Pending,
        embedding_source: None,
        embedding_attempts: 0,
        extraction_status: ExtractionStatus::Unprocessed,
        extraction_attempts: 0,
        last_error: None,
    }
}

async fn insert_message<'e, E>(executor: E, message: &Message) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO messages (id, conversation_id, position, role, content, token_count, created_at, embedding_status, extraction_status)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(message.id.to_string())
    .bind(message.conversation_id.to_string())
    .bind(message.position as i64)
    .bind(message.role.to_string())
    .bind(&message.content)
    .bind(message.token_count as i64)
    .bind(format_datetime(&message.created_at))
    .bind(message.embedding_status.to_string())
    .bind(message.extraction_status.to_string())
    .execute(executor)
    .await
    .map_err(query_error)?;
    Ok(())
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// ArchiveRepository implementation
// ---------------------------------------------------------------------------

impl ArchiveRepository for SqliteArchiveRepository {
    async fn create_conversation(
        &self,
        input: &NewConversation,
    ) -> Result<ArchivedConversation, RepositoryError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            owner: input.owner.trim().to_string(),
            project: non_blank(&input.project),
            title: non_blank(&input.title),
            status: ConversationStatus::Active,
            compaction_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO conversations (id, owner, project, title, status, compaction_attempts, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 0, ?, ?)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.owner)
        .bind(&conversation.project)
        .bind(&conversation.title)
        .bind(conversation.status.to_string())
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        let mut messages = Vec::with_capacity(input.messages.len());
        for (position, m) in input.messages.iter().enumerate() {
            let message = new_message(conversation.id, position as u32, m, now);
            insert_message(&mut *tx, &message).await?;
            messages.push(message);
        }

        tx.commit().await.map_err(query_error)?;

        Ok(ArchivedConversation {
            conversation,
            messages,
        })
    }

    async fn append_message(
        &self,
        conversation_id: &Uuid,
        input: &NewMessage,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM conversations WHERE id = ?")
            .bind(conversation_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        let status: ConversationStatus = status
            .ok_or(RepositoryError::NotFound)?
            .parse()
            .map_err(RepositoryError::Query)?;
        if status == ConversationStatus::Summarized {
            return Err(RepositoryError::Conflict(format!(
                "conversation {conversation_id} is summarized"
            )));
        }

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM messages WHERE conversation_id = ?",
        )
        .bind(conversation_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error)?;

        let now = Utc::now();
        let message = new_message(*conversation_id, next as u32, input, now);
        insert_message(&mut *tx, &message).await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(format_datetime(&now))
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(message)
    }

    async fn get_conversation(
        &self,
        id: &Uuid,
    ) -> Result<Option<ArchivedConversation>, RepositoryError> {
        let Some(conversation) = self.get_conversation_header(id).await? else {
            return Ok(None);
        };
        let messages = self.load_messages(id).await?;
        Ok(Some(ArchivedConversation {
            conversation,
            messages,
        }))
    }

    async fn get_conversation_header(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(r) => Ok(Some(
                ConversationRow::from_row(&r)
                    .map_err(query_error)?
                    .into_conversation()?,
            )),
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        owner: Option<&str>,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let status = status.map(|s| s.to_string());
        let rows = sqlx::query(&format!(
            r#"SELECT {CONVERSATION_COLUMNS} FROM conversations
               WHERE (? IS NULL OR owner = ?) AND (? IS NULL OR status = ?)
               ORDER BY updated_at DESC, id DESC
               LIMIT ?"#
        ))
        .bind(owner)
        .bind(owner)
        .bind(&status)
        .bind(&status)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| ConversationRow::from_row(r).map_err(query_error)?.into_conversation())
            .collect()
    }

    async fn get_messages(&self, ids: &[Uuid]) -> Result<Vec<Message>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool.reader).await.map_err(query_error)?;

        rows.iter()
            .map(|r| MessageRow::from_row(r).map_err(query_error)?.into_message())
            .collect()
    }

    async fn list_pending_embeddings(
        &self,
        limit: u32,
        max_attempts: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages
               WHERE embedding_status = 'pending'
                  OR (embedding_status = 'failed' AND embedding_attempts < ?)
               ORDER BY created_at, position
               LIMIT ?"#
        ))
        .bind(max_attempts as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| MessageRow::from_row(r).map_err(query_error)?.into_message())
            .collect()
    }

    async fn store_embedding(
        &self,
        message_id: &Uuid,
        vector: &[f32],
        source: EmbeddingSource,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            r#"UPDATE messages
               SET embedding = ?, embedding_status = 'ready', embedding_source = ?, last_error = NULL
               WHERE id = ? AND embedding_status IN ('pending', 'failed')"#,
        )
        .bind(vec_to_blob(vector))
        .bind(source.to_string())
        .bind(message_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self.missing_or_conflict(message_id, "embedding already ready").await);
        }

        vector::upsert(&mut *tx, VectorIndex::Messages, message_id, vector).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn record_embedding_failure(
        &self,
        message_id: &Uuid,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE messages
               SET embedding_status = 'failed', embedding_attempts = embedding_attempts + 1, last_error = ?
               WHERE id = ? AND embedding_status != 'ready'"#,
        )
        .bind(error)
        .bind(message_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_conflict(message_id, "embedding already ready").await);
        }
        Ok(())
    }

    async fn request_reembedding(&self, message_id: &Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            r#"UPDATE messages
               SET embedding = NULL, embedding_status = 'pending', embedding_source = NULL,
                   embedding_attempts = 0
               WHERE id = ? AND embedding_status = 'ready'"#,
        )
        .bind(message_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self.missing_or_conflict(message_id, "embedding is not ready").await);
        }

        vector::remove(&mut *tx, VectorIndex::Messages, message_id).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn top_k(
        &self,
        query: &[f32],
        k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<ScoredMessage>, RepositoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        // Vectors of another dimension live in another table and are skipped.
        let Some((table, indexed)) =
            vector::searchable(&self.pool.reader, VectorIndex::Messages, query.len()).await?
        else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"WITH knn AS (
                   SELECT message_id, distance FROM {table}
                   WHERE embedding MATCH ? AND k = ?
               )
               SELECT m.id AS id, knn.distance AS distance
               FROM knn
               JOIN messages m ON m.id = knn.message_id
               JOIN conversations c ON c.id = m.conversation_id
               WHERE m.embedding_status = 'ready'
                 AND (? IS NULL OR c.owner = ?)
                 AND (? OR c.status = 'active')
                 AND (? IS NULL OR c.project = ? OR (? AND c.project IS NULL))
               ORDER BY knn.distance, m.created_at DESC, m.id
               LIMIT ?"#
        );
        let blob = vec_to_blob(query);
        let mut window = KnnWindow::new(k, indexed);

        let rows = loop {
            let rows = sqlx::query(&sql)
                .bind(&blob)
                .bind(window.size() as i64)
                .bind(&scope.owner)
                .bind(&scope.owner)
                .bind(scope.include_archived)
                .bind(&scope.project)
                .bind(&scope.project)
                .bind(scope.include_general)
                .bind(k as i64)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_error)?;
            // Scope filters ran after the KNN cut; widen until k survive.
            if rows.len() >= k || !window.widen() {
                break rows;
            }
        };

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_error)?;
                let distance: f64 = row.try_get("distance").map_err(query_error)?;
                Ok(ScoredMessage {
                    message_id: parse_uuid(&id, "message id")?,
                    score: vector::score(distance),
                })
            })
            .collect()
    }

    async fn list_extraction_queue(
        &self,
        limit: u32,
        max_attempts: u32,
    ) -> Result<Vec<ExtractionWork>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS}, extraction_candidates FROM messages
               WHERE extraction_status IN ('unprocessed', 'extracted')
                  OR (extraction_status = 'extraction_failed' AND extraction_attempts < ?)
               ORDER BY created_at, position
               LIMIT ?"#
        ))
        .bind(max_attempts as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| {
                let candidates: Option<String> =
                    r.try_get("extraction_candidates").map_err(query_error)?;
                let candidates = candidates
                    .map(|json| serde_json::from_str::<Vec<CandidateFact>>(&json))
                    .transpose()
                    .map_err(|e| RepositoryError::Query(format!("invalid candidates: {e}")))?;
                Ok(ExtractionWork {
                    message: MessageRow::from_row(r).map_err(query_error)?.into_message()?,
                    candidates,
                })
            })
            .collect()
    }

    async fn mark_extracted(
        &self,
        message_id: &Uuid,
        candidates: &[CandidateFact],
    ) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(candidates)
            .map_err(|e| RepositoryError::Query(format!("serialize candidates: {e}")))?;

        let result = sqlx::query(
            r#"UPDATE messages
               SET extraction_status = 'extracted', extraction_candidates = ?
               WHERE id = ? AND extraction_status != 'merged'"#,
        )
        .bind(json)
        .bind(message_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_conflict(message_id, "already merged").await);
        }
        Ok(())
    }

    async fn record_extraction_failure(
        &self,
        message_id: &Uuid,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE messages
               SET extraction_status = 'extraction_failed',
                   extraction_attempts = extraction_attempts + 1,
                   last_error = ?
               WHERE id = ? AND extraction_status != 'merged'"#,
        )
        .bind(error)
        .bind(message_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_conflict(message_id, "already merged").await);
        }
        Ok(())
    }

    async fn list_compaction_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
        max_attempts: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {CONVERSATION_COLUMNS} FROM conversations
               WHERE status = 'active'
                 AND compaction_attempts < ?
                 AND EXISTS (SELECT 1 FROM messages WHERE messages.conversation_id = conversations.id)
                 AND NOT EXISTS (
                     SELECT 1 FROM messages
                     WHERE messages.conversation_id = conversations.id
                       AND messages.embedding_status != 'ready'
                 )
                 AND (SELECT MAX(messages.created_at) FROM messages
                      WHERE messages.conversation_id = conversations.id) < ?
               ORDER BY created_at
               LIMIT ?"#
        ))
        .bind(max_attempts as i64)
        .bind(format_datetime(&cutoff))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| ConversationRow::from_row(r).map_err(query_error)?.into_conversation())
            .collect()
    }

    async fn mark_summarized(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE conversations
               SET status = 'summarized', last_error = NULL, updated_at = ?
               WHERE id = ? AND status = 'active'
                 AND NOT EXISTS (
                     SELECT 1 FROM messages
                     WHERE messages.conversation_id = ? AND messages.embedding_status != 'ready'
                 )"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        let exists = sqlx::query("SELECT 1 FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_error)?;
        match exists {
            Some(_) => Err(RepositoryError::Conflict(format!(
                "conversation {id} is not active or has messages awaiting embedding"
            ))),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn reassign_project(
        &self,
        id: &Uuid,
        project: Option<&str>,
    ) -> Result<Conversation, RepositoryError> {
        let project = non_blank(&project.map(str::to_string));
        let result = sqlx::query("UPDATE conversations SET project = ?, updated_at = ? WHERE id = ?")
            .bind(&project)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)?;
        ConversationRow::from_row(&row)
            .map_err(query_error)?
            .into_conversation()
    }

    async fn record_compaction_failure(&self, id: &Uuid, error: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE conversations
               SET compaction_attempts = compaction_attempts + 1, last_error = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn maintenance_counts(&self, max_attempts: u32) -> Result<MaintenanceStatus, RepositoryError> {
        let max = max_attempts as i64;
        let row = sqlx::query(
            r#"SELECT
                 (SELECT COUNT(*) FROM conversations WHERE status = 'active') AS active,
                 (SELECT COUNT(*) FROM conversations WHERE status = 'summarized') AS summarized,
                 (SELECT COUNT(*) FROM messages) AS messages,
                 (SELECT COUNT(*) FROM messages
                   WHERE embedding_status = 'pending'
                      OR (embedding_status = 'failed' AND embedding_attempts < ?)) AS pending_embeddings,
                 (SELECT COUNT(*) FROM messages
                   WHERE embedding_status = 'failed' AND embedding_attempts >= ?) AS failed_embeddings,
                 (SELECT COUNT(*) FROM messages
                   WHERE extraction_status IN ('unprocessed', 'extracted')
                      OR (extraction_status = 'extraction_failed' AND extraction_attempts < ?)) AS pending_extractions,
                 (SELECT COUNT(*) FROM messages
                   WHERE extraction_status = 'extraction_failed' AND extraction_attempts >= ?) AS failed_extractions,
                 (SELECT COUNT(*) FROM conversations
                   WHERE status = 'active' AND compaction_attempts >= ?) AS failed_compactions"#,
        )
        .bind(max)
        .bind(max)
        .bind(max)
        .bind(max)
        .bind(max)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let count = |name: &str| -> Result<u64, RepositoryError> {
            row.try_get::<i64, _>(name)
                .map(|n| n as u64)
                .map_err(query_error)
        };

        Ok(MaintenanceStatus {
            active_conversations: count("active")?,
            summarized_conversations: count("summarized")?,
            messages: count("messages")?,
            pending_embeddings: count("pending_embeddings")?,
            failed_embeddings: count("failed_embeddings")?,
            pending_extractions: count("pending_extractions")?,
            failed_extractions: count("failed_extractions")?,
            failed_compactions: count("failed_compactions")?,
            facts: 0,
            digests: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;
    use chrono::Duration;
    use strata_types::archive::MessageRole;
    use strata_types::knowledge::FactKind;

    fn conversation(owner: &str, contents: &[&str]) -> NewConversation {
        NewConversation {
            owner: owner.to_string(),
            project: None,
            title: Some("test".to_string()),
            messages: contents
                .iter()
                .map(|c| NewMessage::new(MessageRole::User, *c))
                .collect(),
        }
    }

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_create_and_get_preserves_order() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["one", "two", "three"]))
            .await
            .unwrap();

        let loaded = repo
            .get_conversation(&created.conversation.id)
            .await
            .unwrap()
            .unwrap();
        let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(loaded.messages[2].position, 2);
        assert!(loaded.messages.iter().all(|m| {
            m.embedding_status == EmbeddingStatus::Pending
                && m.extraction_status == ExtractionStatus::Unprocessed
        }));
        assert_eq!(loaded.conversation.status, ConversationStatus::Active);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_nothing_behind() {
        let pool = test_pool().await;
        let repo = SqliteArchiveRepository::new(pool.clone());

        // A trigger makes the third insert fail mid-transaction.
        sqlx::query(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON messages
             WHEN NEW.content = 'poison' BEGIN SELECT RAISE(ABORT, 'poison'); END",
        )
        .execute(&pool.writer)
        .await
        .unwrap();

        let err = repo
            .create_conversation(&conversation("alice", &["ok", "fine", "poison"]))
            .await;
        assert!(err.is_err());

        let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert_eq!((conversations, messages), (0, 0));
    }

    #[tokio::test]
    async fn test_append_message() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["first"]))
            .await
            .unwrap();
        let id = created.conversation.id;

        let appended = repo
            .append_message(&id, &NewMessage::new(MessageRole::Assistant, "second"))
            .await
            .unwrap();
        assert_eq!(appended.position, 1);

        let missing = repo
            .append_message(&Uuid::now_v7(), &NewMessage::new(MessageRole::User, "x"))
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));

        for m in [&created.messages[0], &appended] {
            repo.store_embedding(&m.id, &unit(4, 0), EmbeddingSource::Fallback)
                .await
                .unwrap();
        }
        repo.mark_summarized(&id).await.unwrap();
        let closed = repo
            .append_message(&id, &NewMessage::new(MessageRole::User, "late"))
            .await;
        assert!(matches!(closed, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_ready_embedding_is_never_overwritten() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["hello"]))
            .await
            .unwrap();
        let id = created.messages[0].id;

        repo.store_embedding(&id, &unit(4, 0), EmbeddingSource::Fallback)
            .await
            .unwrap();
        let again = repo
            .store_embedding(&id, &unit(4, 1), EmbeddingSource::Model)
            .await;
        assert!(matches!(again, Err(RepositoryError::Conflict(_))));
        assert!(repo.list_pending_embeddings(10, 3).await.unwrap().is_empty());

        repo.request_reembedding(&id).await.unwrap();
        let pending = repo.list_pending_embeddings(10, 3).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].embedding_source.is_none());
        assert!(repo
            .top_k(&unit(4, 0), 5, &SearchScope::default())
            .await
            .unwrap()
            .is_empty());

        let unknown = repo.store_embedding(&Uuid::now_v7(), &unit(4, 0), EmbeddingSource::Model).await;
        assert!(matches!(unknown, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_failed_embeddings_retry_until_bound() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["hello"]))
            .await
            .unwrap();
        let id = created.messages[0].id;

        for _ in 0..2 {
            repo.record_embedding_failure(&id, "boom").await.unwrap();
        }
        assert_eq!(repo.list_pending_embeddings(10, 3).await.unwrap().len(), 1);

        repo.record_embedding_failure(&id, "boom").await.unwrap();
        assert!(repo.list_pending_embeddings(10, 3).await.unwrap().is_empty());

        let counts = repo.maintenance_counts(3).await.unwrap();
        assert_eq!(counts.failed_embeddings, 1);
        assert_eq!(counts.pending_embeddings, 0);
    }

    #[tokio::test]
    async fn test_top_k_orders_by_score_then_recency() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let base = Utc::now() - Duration::hours(1);
        let mut input = conversation("alice", &["old", "new", "other"]);
        for (i, m) in input.messages.iter_mut().enumerate() {
            m.created_at = Some(base + Duration::minutes(i as i64));
        }
        let created = repo.create_conversation(&input).await.unwrap();
        let ids: Vec<Uuid> = created.messages.iter().map(|m| m.id).collect();

        repo.store_embedding(&ids[0], &unit(4, 0), EmbeddingSource::Fallback).await.unwrap();
        repo.store_embedding(&ids[1], &unit(4, 0), EmbeddingSource::Fallback).await.unwrap();
        repo.store_embedding(&ids[2], &unit(4, 1), EmbeddingSource::Fallback).await.unwrap();

        let hits = repo.top_k(&unit(4, 0), 10, &SearchScope::default()).await.unwrap();
        let order: Vec<Uuid> = hits.iter().map(|h| h.message_id).collect();
        assert_eq!(order, vec![ids[1], ids[0], ids[2]]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);

        let top1 = repo.top_k(&unit(4, 0), 1, &SearchScope::default()).await.unwrap();
        assert_eq!(top1[0].message_id, ids[1]);
    }

    #[tokio::test]
    async fn test_top_k_scope_filters() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let mut general = conversation("alice", &["general"]);
        general.project = None;
        let mut scoped = conversation("alice", &["scoped"]);
        scoped.project = Some("atlas".into());
        let other_owner = conversation("bob", &["bob"]);

        let mut ids = Vec::new();
        for c in [&general, &scoped, &other_owner] {
            let created = repo.create_conversation(c).await.unwrap();
            let id = created.messages[0].id;
            repo.store_embedding(&id, &unit(4, 0), EmbeddingSource::Fallback).await.unwrap();
            ids.push((created.conversation.id, id));
        }

        let alice = SearchScope::for_owner("alice");
        assert_eq!(repo.top_k(&unit(4, 0), 10, &alice).await.unwrap().len(), 2);

        let project_only = SearchScope {
            project: Some("atlas".into()),
            include_general: false,
            ..SearchScope::for_owner("alice")
        };
        let hits = repo.top_k(&unit(4, 0), 10, &project_only).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, ids[1].1);

        let project_and_general = SearchScope {
            project: Some("atlas".into()),
            ..SearchScope::for_owner("alice")
        };
        assert_eq!(repo.top_k(&unit(4, 0), 10, &project_and_general).await.unwrap().len(), 2);

        repo.mark_summarized(&ids[0].0).await.unwrap();
        assert_eq!(repo.top_k(&unit(4, 0), 10, &alice).await.unwrap().len(), 1);
        assert_eq!(
            repo.top_k(&unit(4, 0), 10, &alice.clone().with_archived()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_extraction_queue_roundtrip() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["I prefer tabs", "ok"]))
            .await
            .unwrap();
        let first = created.messages[0].id;

        let queue = repo.list_extraction_queue(10, 3).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|w| w.candidates.is_none()));

        let candidates = vec![CandidateFact::new(FactKind::Preference, "tabs", 0.8)];
        repo.mark_extracted(&first, &candidates).await.unwrap();
        let queue = repo.list_extraction_queue(10, 3).await.unwrap();
        let work = queue.iter().find(|w| w.message.id == first).unwrap();
        assert_eq!(work.message.extraction_status, ExtractionStatus::Extracted);
        assert_eq!(work.candidates.as_deref(), Some(candidates.as_slice()));

        let second = created.messages[1].id;
        for _ in 0..3 {
            repo.record_extraction_failure(&second, "bad output").await.unwrap();
        }
        let queue = repo.list_extraction_queue(10, 3).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(repo.maintenance_counts(3).await.unwrap().failed_extractions, 1);
    }

    #[tokio::test]
    async fn test_compaction_candidates_require_age_and_ready_embeddings() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let old = Utc::now() - Duration::days(30);
        let mut input = conversation("alice", &["a", "b"]);
        for m in &mut input.messages {
            m.created_at = Some(old);
        }
        let created = repo.create_conversation(&input).await.unwrap();
        let cutoff = Utc::now() - Duration::days(7);

        // Pending embeddings block compaction.
        assert!(repo.list_compaction_candidates(cutoff, 10, 3).await.unwrap().is_empty());

        for m in &created.messages {
            repo.store_embedding(&m.id, &unit(4, 0), EmbeddingSource::Fallback)
                .await
                .unwrap();
        }
        let candidates = repo.list_compaction_candidates(cutoff, 10, 3).await.unwrap();
        assert_eq!(candidates.len(), 1);

        // Too recent for an older cutoff.
        assert!(repo
            .list_compaction_candidates(old - Duration::days(1), 10, 3)
            .await
            .unwrap()
            .is_empty());

        let id = created.conversation.id;
        for _ in 0..3 {
            repo.record_compaction_failure(&id, "summarizer down").await.unwrap();
        }
        assert!(repo.list_compaction_candidates(cutoff, 10, 3).await.unwrap().is_empty());
        let counts = repo.maintenance_counts(3).await.unwrap();
        assert_eq!(counts.failed_compactions, 1);
        assert_eq!(counts.active_conversations, 1);
        assert_eq!(counts.messages, 2);
    }

    #[tokio::test]
    async fn test_list_conversations_filters() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let a = repo.create_conversation(&conversation("alice", &["x"])).await.unwrap();
        repo.create_conversation(&conversation("bob", &["y"])).await.unwrap();
        repo.store_embedding(&a.messages[0].id, &unit(4, 0), EmbeddingSource::Fallback)
            .await
            .unwrap();
        repo.mark_summarized(&a.conversation.id).await.unwrap();

        assert_eq!(repo.list_conversations(None, None, 10).await.unwrap().len(), 2);
        assert_eq!(repo.list_conversations(Some("bob"), None, 10).await.unwrap().len(), 1);
        let summarized = repo
            .list_conversations(None, Some(ConversationStatus::Summarized), 10)
            .await
            .unwrap();
        assert_eq!(summarized.len(), 1);
        assert_eq!(summarized[0].owner, "alice");
    }

    #[tokio::test]
    async fn test_summarize_flip_is_guarded_by_unready_messages() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["first"]))
            .await
            .unwrap();
        let id = created.conversation.id;
        repo.store_embedding(&created.messages[0].id, &unit(4, 0), EmbeddingSource::Fallback)
            .await
            .unwrap();

        // Appended after the compactor picked the conversation up.
        let late = repo
            .append_message(&id, &NewMessage::new(MessageRole::User, "late"))
            .await
            .unwrap();
        let err = repo.mark_summarized(&id).await;
        assert!(matches!(err, Err(RepositoryError::Conflict(_))));
        let header = repo.get_conversation_header(&id).await.unwrap().unwrap();
        assert_eq!(header.status, ConversationStatus::Active);

        repo.store_embedding(&late.id, &unit(4, 1), EmbeddingSource::Fallback)
            .await
            .unwrap();
        repo.mark_summarized(&id).await.unwrap();

        // Already summarized.
        assert!(matches!(
            repo.mark_summarized(&id).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert!(matches!(
            repo.mark_summarized(&Uuid::now_v7()).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_top_k_ignores_other_dimensions() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["small", "large"]))
            .await
            .unwrap();
        let (small, large) = (created.messages[0].id, created.messages[1].id);
        repo.store_embedding(&small, &unit(4, 0), EmbeddingSource::Fallback).await.unwrap();
        repo.store_embedding(&large, &unit(8, 0), EmbeddingSource::Model).await.unwrap();

        let hits = repo.top_k(&unit(4, 0), 10, &SearchScope::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, small);

        let hits = repo.top_k(&unit(8, 0), 10, &SearchScope::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, large);

        assert!(repo.top_k(&unit(16, 0), 10, &SearchScope::default()).await.unwrap().is_empty());
        assert!(repo.top_k(&[], 10, &SearchScope::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_widens_past_filtered_neighbours() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        // Twelve of bob's messages sit closer to the query than alice's one.
        let bob = repo
            .create_conversation(&conversation("bob", &["b"; 12]))
            .await
            .unwrap();
        for m in &bob.messages {
            repo.store_embedding(&m.id, &unit(4, 0), EmbeddingSource::Fallback).await.unwrap();
        }
        let alice = repo
            .create_conversation(&conversation("alice", &["a"]))
            .await
            .unwrap();
        repo.store_embedding(&alice.messages[0].id, &[0.6, 0.8, 0.0, 0.0], EmbeddingSource::Fallback)
            .await
            .unwrap();

        let hits = repo
            .top_k(&unit(4, 0), 1, &SearchScope::for_owner("alice"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, alice.messages[0].id);
        assert!((hits[0].score - 0.6).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_reassign_project() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["x"]))
            .await
            .unwrap();
        let id = created.conversation.id;

        let moved = repo.reassign_project(&id, Some("atlas")).await.unwrap();
        assert_eq!(moved.project.as_deref(), Some("atlas"));
        assert!(moved.updated_at >= created.conversation.updated_at);

        let general = repo.reassign_project(&id, Some("  ")).await.unwrap();
        assert!(general.project.is_none());
        repo.reassign_project(&id, Some("atlas")).await.unwrap();
        let general = repo.reassign_project(&id, None).await.unwrap();
        assert!(general.project.is_none());

        let missing = repo.reassign_project(&Uuid::now_v7(), Some("atlas")).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_messages_carry_token_counts() {
        let repo = SqliteArchiveRepository::new(test_pool().await);
        let created = repo
            .create_conversation(&conversation("alice", &["hello world"]))
            .await
            .unwrap();
        assert_eq!(created.messages[0].token_count, 2);

        let appended = repo
            .append_message(
                &created.conversation.id,
                &NewMessage::new(MessageRole::Assistant, "hello world, how are you today?"),
            )
            .await
            .unwrap();
        let loaded = repo
            .get_conversation(&created.conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.messages[0].token_count, 2);
        assert_eq!(loaded.messages[1].token_count, appended.token_count);
        assert!(appended.token_count > 2);
    }
}
