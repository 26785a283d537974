//! Memory engine: the orchestrator over the four memory layers.
//!
//! Requests (archive, search, retrieve) run concurrently. Background work
//! runs in bounded sweeps with a fixed phase order: pending embeddings,
//! then knowledge extraction, then compaction. Only one sweep runs at a
//! time per engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use strata_types::archive::{
    ArchivedConversation, Conversation, ConversationStatus, EmbeddingSource, Message,
    NewConversation, NewMessage,
};
use strata_types::config::MaintenanceConfig;
use strata_types::digest::SummaryDigest;
use strata_types::error::{MemoryError, RepositoryError};
use strata_types::knowledge::{FactKind, KnowledgeFact};
use strata_types::maintenance::{MaintenanceStatus, SweepReport};
use strata_types::search::{
    RetrievalBundle, RetrieveRequest, ScoredMessage, SearchHit, SearchResults, SearchScope,
};

use crate::embedding::EmbeddingAdapter;
use crate::knowledge::{BoxFactExtractor, KnowledgeGraphBuilder};
use crate::repository::{ArchiveRepository, DigestRepository, KnowledgeRepository};
use crate::summary::{BoxSummarizer, SummaryCompactor};

/// Largest `k` accepted by search and retrieval.
pub const MAX_SEARCH_K: usize = 100;

/// Sweep bounds for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub batch_size: u32,
    pub max_attempts: u32,
    pub compaction_age: Duration,
    pub summary_chunk_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&MaintenanceConfig::default())
    }
}

impl From<&MaintenanceConfig> for EngineConfig {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            compaction_age: Duration::hours(config.compaction_age_hours as i64),
            summary_chunk_chars: config.summary_chunk_chars.max(1),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EmbeddingPass {
    model: u32,
    fallback: u32,
    failures: u32,
}

/// Orchestrates archive, vector index, knowledge graph and summaries.
///
/// Generic over the repository traits; strata-core never depends on a
/// concrete storage backend.
pub struct MemoryEngine<A: ArchiveRepository, K: KnowledgeRepository, D: DigestRepository> {
    archive: A,
    knowledge: K,
    digests: D,
    embedder: Arc<EmbeddingAdapter>,
    builder: KnowledgeGraphBuilder,
    compactor: SummaryCompactor,
    config: EngineConfig,
    sweep_lock: Mutex<()>,
}

impl<A: ArchiveRepository, K: KnowledgeRepository, D: DigestRepository> MemoryEngine<A, K, D> {
    pub fn new(
        archive: A,
        knowledge: K,
        digests: D,
        embedder: Arc<EmbeddingAdapter>,
        extractor: BoxFactExtractor,
        summarizer: BoxSummarizer,
        config: EngineConfig,
    ) -> Self {
        let builder = KnowledgeGraphBuilder::new(extractor, embedder.clone());
        let compactor = SummaryCompactor::new(
            summarizer,
            embedder.clone(),
            config.compaction_age,
            config.summary_chunk_chars,
        );
        Self {
            archive,
            knowledge,
            digests,
            embedder,
            builder,
            compactor,
            config,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn embedder(&self) -> &EmbeddingAdapter {
        &self.embedder
    }

    pub fn extractor_name(&self) -> &str {
        self.builder.extractor_name()
    }

    pub fn summarizer_name(&self) -> &str {
        self.compactor.summarizer_name()
    }

    /// Persist a conversation and its messages atomically.
    ///
    /// Returns once stored; messages become searchable after the next sweep.
    #[tracing::instrument(
        name = "engine.archive",
        skip(self, conversation),
        fields(owner = %conversation.owner, messages = conversation.messages.len())
    )]
    pub async fn archive(
        &self,
        conversation: NewConversation,
    ) -> Result<ArchivedConversation, MemoryError> {
        conversation.validate().map_err(MemoryError::Validation)?;
        let archived = self.archive.create_conversation(&conversation).await?;
        tracing::info!(
            conversation_id = %archived.conversation.id,
            messages = archived.messages.len(),
            "Conversation archived"
        );
        Ok(archived)
    }

    /// Append one message to an active conversation.
    #[tracing::instrument(name = "engine.append", skip(self, message))]
    pub async fn append(
        &self,
        conversation_id: &Uuid,
        message: NewMessage,
    ) -> Result<Message, MemoryError> {
        message.validate().map_err(MemoryError::Validation)?;
        self.archive
            .append_message(conversation_id, &message)
            .await
            .map_err(|e| map_not_found(e, || format!("conversation {conversation_id}")))
    }

    /// Move a conversation into a project, or back to general with `None`.
    #[tracing::instrument(name = "engine.reassign_project", skip(self))]
    pub async fn reassign_project(
        &self,
        conversation_id: &Uuid,
        project: Option<&str>,
    ) -> Result<Conversation, MemoryError> {
        let conversation = self
            .archive
            .reassign_project(conversation_id, project)
            .await
            .map_err(|e| map_not_found(e, || format!("conversation {conversation_id}")))?;
        tracing::info!(
            %conversation_id,
            project = conversation.project.as_deref().unwrap_or("general"),
            "Conversation reassigned"
        );
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &Uuid) -> Result<ArchivedConversation, MemoryError> {
        self.archive
            .get_conversation(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("conversation {id}")))
    }

    pub async fn list_conversations(
        &self,
        owner: Option<&str>,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> Result<Vec<Conversation>, MemoryError> {
        Ok(self.archive.list_conversations(owner, status, limit).await?)
    }

    /// Semantic search over ready message embeddings.
    ///
    /// Hits are ranked by similarity, newer messages first on ties. Facts
    /// sourced from the hit messages are attached for context, with their
    /// sources narrowed to the hit owners' messages.
    #[tracing::instrument(name = "engine.search", skip(self, query, scope))]
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        scope: &SearchScope,
    ) -> Result<SearchResults, MemoryError> {
        validate_query(query)?;
        validate_k("k", k, false)?;

        let vector = self.embedder.embed(query).await.vector;
        let scored = self.archive.top_k(&vector, k, scope).await?;
        let hits = self.hydrate(&scored).await?;

        let ids: Vec<Uuid> = hits.iter().map(|h| h.message.id).collect();
        let facts = if ids.is_empty() {
            Vec::new()
        } else {
            self.knowledge.facts_for_messages(&ids).await?
        };

        tracing::debug!(hits = hits.len(), facts = facts.len(), "Search complete");
        Ok(SearchResults { hits, facts })
    }

    /// Unified retrieval across messages, facts and digests for one query.
    ///
    /// Each layer's `k` may be zero to skip it, but not all of them.
    #[tracing::instrument(name = "engine.retrieve", skip(self, request))]
    pub async fn retrieve(&self, request: &RetrieveRequest) -> Result<RetrievalBundle, MemoryError> {
        validate_query(&request.query)?;
        validate_k("k_messages", request.k_messages, true)?;
        validate_k("k_facts", request.k_facts, true)?;
        validate_k("k_digests", request.k_digests, true)?;
        if request.k_messages + request.k_facts + request.k_digests == 0 {
            return Err(MemoryError::validation("at least one of k_messages, k_facts, k_digests must be positive"));
        }

        let vector = self.embedder.embed(&request.query).await.vector;

        let messages = if request.k_messages > 0 {
            let scored = self
                .archive
                .top_k(&vector, request.k_messages, &request.scope)
                .await?;
            self.hydrate(&scored).await?
        } else {
            Vec::new()
        };
        let facts = if request.k_facts > 0 {
            self.knowledge.top_facts(&vector, request.k_facts).await?
        } else {
            Vec::new()
        };
        let digests = if request.k_digests > 0 {
            self.digests
                .top_digests(&vector, request.k_digests, request.scope.owner.as_deref())
                .await?
        } else {
            Vec::new()
        };

        Ok(RetrievalBundle {
            messages,
            facts,
            digests,
        })
    }

    /// One bounded maintenance sweep at the current time.
    pub async fn run_maintenance_sweep(&self) -> Result<SweepReport, MemoryError> {
        self.run_maintenance_sweep_at(Utc::now()).await
    }

    /// One bounded maintenance sweep, with `now` as the compaction clock.
    ///
    /// Phases run in order: embeddings, knowledge extraction, compaction.
    /// Compaction only selects conversations whose messages are all ready,
    /// so it never hides unindexed content behind a digest.
    #[tracing::instrument(name = "engine.sweep", skip(self))]
    pub async fn run_maintenance_sweep_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, MemoryError> {
        let _guard = self.sweep_lock.lock().await;
        let started = Instant::now();
        let EngineConfig {
            batch_size,
            max_attempts,
            ..
        } = self.config;

        let embedded = self.embed_pending(batch_size, max_attempts).await?;
        let extraction = self
            .builder
            .run(&self.archive, &self.knowledge, batch_size, max_attempts)
            .await?;
        let compaction = self
            .compactor
            .run(&self.archive, &self.digests, now, batch_size, max_attempts)
            .await?;

        let report = SweepReport {
            embedded: embedded.model,
            embedded_with_fallback: embedded.fallback,
            embedding_failures: embedded.failures,
            messages_merged: extraction.messages_merged,
            facts_created: extraction.facts_created,
            facts_corroborated: extraction.facts_corroborated,
            extraction_failures: extraction.failures,
            conversations_compacted: compaction.compacted,
            conversations_recovered: compaction.recovered,
            compaction_failures: compaction.failures,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if !report.is_idle() {
            tracing::info!(?report, "Maintenance sweep complete");
        }
        Ok(report)
    }

    /// Queue depths, permanent failures and layer sizes.
    pub async fn status(&self) -> Result<MaintenanceStatus, MemoryError> {
        let mut status = self
            .archive
            .maintenance_counts(self.config.max_attempts)
            .await?;
        status.facts = self.knowledge.count_facts().await?;
        status.digests = self.digests.count_digests().await?;
        Ok(status)
    }

    /// Send a ready message back through the embedding queue.
    ///
    /// The message leaves search results until the next sweep embeds it.
    pub async fn reembed_message(&self, message_id: &Uuid) -> Result<(), MemoryError> {
        self.archive
            .request_reembedding(message_id)
            .await
            .map_err(|e| map_not_found(e, || format!("message {message_id}")))?;
        tracing::info!(%message_id, "Message queued for re-embedding");
        Ok(())
    }

    pub async fn list_facts(
        &self,
        kind: Option<FactKind>,
        limit: u32,
    ) -> Result<Vec<KnowledgeFact>, MemoryError> {
        Ok(self.knowledge.list_facts(kind, limit).await?)
    }

    pub async fn list_digests(
        &self,
        owner: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SummaryDigest>, MemoryError> {
        Ok(self.digests.list_digests(owner, limit).await?)
    }

    async fn embed_pending(
        &self,
        limit: u32,
        max_attempts: u32,
    ) -> Result<EmbeddingPass, RepositoryError> {
        let pending = self.archive.list_pending_embeddings(limit, max_attempts).await?;
        let mut pass = EmbeddingPass::default();
        if pending.is_empty() {
            return Ok(pass);
        }

        let texts: Vec<String> = pending.iter().map(|m| m.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;

        for (message, embedding) in pending.iter().zip(embeddings) {
            match self
                .archive
                .store_embedding(&message.id, &embedding.vector, embedding.source)
                .await
            {
                Ok(()) => match embedding.source {
                    EmbeddingSource::Model => pass.model += 1,
                    EmbeddingSource::Fallback => pass.fallback += 1,
                },
                // Already ready: a concurrent writer got there first.
                Err(RepositoryError::Conflict(_)) => {}
                Err(error) => {
                    pass.failures += 1;
                    tracing::warn!(message_id = %message.id, %error, "Failed to store embedding");
                    self.archive
                        .record_embedding_failure(&message.id, &error.to_string())
                        .await?;
                }
            }
        }

        tracing::debug!(
            model = pass.model,
            fallback = pass.fallback,
            failures = pass.failures,
            "Embedding pass complete"
        );
        Ok(pass)
    }

    /// Load messages and their conversations, keeping the ranked order.
    async fn hydrate(&self, scored: &[ScoredMessage]) -> Result<Vec<SearchHit>, MemoryError> {
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = scored.iter().map(|s| s.message_id).collect();
        let mut messages: HashMap<Uuid, Message> = self
            .archive
            .get_messages(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut conversations: HashMap<Uuid, Conversation> = HashMap::new();
        let mut hits = Vec::with_capacity(scored.len());

        for entry in scored {
            let Some(message) = messages.remove(&entry.message_id) else {
                continue;
            };
            if !conversations.contains_key(&message.conversation_id) {
                match self
                    .archive
                    .get_conversation_header(&message.conversation_id)
                    .await?
                {
                    Some(c) => {
                        conversations.insert(c.id, c);
                    }
                    None => continue,
                }
            }
            if let Some(conversation) = conversations.get(&message.conversation_id) {
                hits.push(SearchHit {
                    score: entry.score,
                    conversation: conversation.clone(),
                    message,
                });
            }
        }
        Ok(hits)
    }
}

fn validate_query(query: &str) -> Result<(), MemoryError> {
    if query.trim().is_empty() {
        return Err(MemoryError::validation("query must not be empty"));
    }
    Ok(())
}

fn validate_k(name: &str, k: usize, allow_zero: bool) -> Result<(), MemoryError> {
    if k == 0 && !allow_zero {
        return Err(MemoryError::validation(format!("{name} must be positive")));
    }
    if k > MAX_SEARCH_K {
        return Err(MemoryError::validation(format!(
            "{name} must be at most {MAX_SEARCH_K}"
        )));
    }
    Ok(())
}

fn map_not_found(error: RepositoryError, what: impl FnOnce() -> String) -> MemoryError {
    match error {
        RepositoryError::NotFound => MemoryError::NotFound(what()),
        RepositoryError::Conflict(message) => MemoryError::Conflict(message),
        other => MemoryError::Repository(other),
    }
}
