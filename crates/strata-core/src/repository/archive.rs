//! ArchiveRepository trait definition.
//!
//! The archive is the source of truth: conversations, their ordered
//! messages, and the per-message status columns that act as the embedding
//! and extraction work queues. It also exposes the similarity primitive
//! over stored message vectors.

use chrono::{DateTime, Utc};
use strata_types::archive::{
    ArchivedConversation, Conversation, ConversationStatus, EmbeddingSource, Message,
    NewConversation, NewMessage,
};
use strata_types::error::RepositoryError;
use strata_types::knowledge::CandidateFact;
use strata_types::maintenance::MaintenanceStatus;
use strata_types::search::{ScoredMessage, SearchScope};
use uuid::Uuid;

/// A message waiting in the extraction queue.
///
/// `candidates` is set when extraction already ran and only the merge step
/// remains (status `extracted`).
#[derive(Debug, Clone)]
pub struct ExtractionWork {
    pub message: Message,
    pub candidates: Option<Vec<CandidateFact>>,
}

/// Repository trait for the conversation archive.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ArchiveRepository: Send + Sync {
    /// Insert a conversation and all of its messages atomically.
    ///
    /// Messages are stored with `pending` embeddings and `unprocessed`
    /// extraction status, in input order.
    fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> impl std::future::Future<Output = Result<ArchivedConversation, RepositoryError>> + Send;

    /// Append one message at the end of an active conversation.
    ///
    /// `NotFound` for an unknown conversation, `Conflict` when it is summarized.
    fn append_message(
        &self,
        conversation_id: &Uuid,
        message: &NewMessage,
    ) -> impl std::future::Future<Output = Result<Message, RepositoryError>> + Send;

    /// Conversation with its messages in position order.
    fn get_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ArchivedConversation>, RepositoryError>> + Send;

    /// Conversation header without messages.
    fn get_conversation_header(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Conversation headers, newest first.
    fn list_conversations(
        &self,
        owner: Option<&str>,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Messages by id, in no particular order. Unknown ids are skipped.
    fn get_messages(
        &self,
        ids: &[Uuid],
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Messages whose embedding is `pending`, or `failed` with fewer than
    /// `max_attempts` attempts, oldest first.
    fn list_pending_embeddings(
        &self,
        limit: u32,
        max_attempts: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Store a vector and flip the message to `ready`.
    ///
    /// Only applies to `pending`/`failed` messages; a `ready` vector is
    /// never overwritten (`Conflict`).
    fn store_embedding(
        &self,
        message_id: &Uuid,
        vector: &[f32],
        source: EmbeddingSource,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark an embedding attempt as failed and bump the attempt counter.
    fn record_embedding_failure(
        &self,
        message_id: &Uuid,
        error: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Send a `ready` message back through `pending`, dropping its vector
    /// in the same statement so it leaves search atomically.
    fn request_reembedding(
        &self,
        message_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Similarity primitive over `ready` message vectors.
    ///
    /// Ranked by similarity descending, ties broken by newest `created_at`.
    /// Only vectors with the same dimension as `query` are considered.
    fn top_k(
        &self,
        query: &[f32],
        k: usize,
        scope: &SearchScope,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredMessage>, RepositoryError>> + Send;

    /// Messages awaiting extraction or merge, oldest first.
    ///
    /// Includes `unprocessed`, `extracted`, and `extraction_failed` with
    /// fewer than `max_attempts` attempts. Never includes `merged`.
    fn list_extraction_queue(
        &self,
        limit: u32,
        max_attempts: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExtractionWork>, RepositoryError>> + Send;

    /// Persist extractor output and move the message to `extracted`.
    fn mark_extracted(
        &self,
        message_id: &Uuid,
        candidates: &[CandidateFact],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark extraction as failed and bump the attempt counter.
    fn record_extraction_failure(
        &self,
        message_id: &Uuid,
        error: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Active conversations ready for compaction.
    ///
    /// The newest message is older than `cutoff`, every message is `ready`,
    /// and fewer than `max_attempts` compactions have failed.
    fn list_compaction_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
        max_attempts: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Flip an active conversation to `summarized`.
    ///
    /// Guarded in the same statement: `Conflict` when the conversation is no
    /// longer active or any of its messages is not `ready` (for example one
    /// appended while the digest was being written).
    fn mark_summarized(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Move a conversation into a project, or back to general with `None`.
    ///
    /// Blank names mean general. Returns the updated header.
    fn reassign_project(
        &self,
        id: &Uuid,
        project: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    fn record_compaction_failure(
        &self,
        id: &Uuid,
        error: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Queue depths and permanent failures. `facts` and `digests` are left at zero.
    fn maintenance_counts(
        &self,
        max_attempts: u32,
    ) -> impl std::future::Future<Output = Result<MaintenanceStatus, RepositoryError>> + Send;
}
