//! End-to-end engine behavior over the SQLite repositories.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use strata_core::embedding::EmbeddingAdapter;
use strata_core::knowledge::{BoxFactExtractor, HeuristicExtractor};
use strata_core::repository::{ArchiveRepository, DigestRepository};
use strata_core::summary::{BoxSummarizer, ExtractiveSummarizer, Summarizer, SummaryStage};
use strata_core::{EngineConfig, MemoryEngine};
use strata_types::archive::{
    ConversationStatus, EmbeddingSource, EmbeddingStatus, ExtractionStatus, MessageRole,
    NewConversation, NewMessage,
};
use strata_types::digest::SummaryDigest;
use strata_types::error::{MemoryError, SummarizeError};
use strata_types::knowledge::FactKind;
use strata_types::search::{RetrieveRequest, SearchScope};

use super::{
    DatabasePool, SqliteArchiveRepository, SqliteDigestRepository, SqliteKnowledgeRepository,
    test_pool,
};

type TestEngine =
    MemoryEngine<SqliteArchiveRepository, SqliteKnowledgeRepository, SqliteDigestRepository>;

const DIMENSION: usize = 64;

async fn engine() -> (TestEngine, DatabasePool) {
    engine_with(BoxSummarizer::new(ExtractiveSummarizer)).await
}

async fn engine_with(summarizer: BoxSummarizer) -> (TestEngine, DatabasePool) {
    let pool = test_pool().await;
    let engine = MemoryEngine::new(
        SqliteArchiveRepository::new(pool.clone()),
        SqliteKnowledgeRepository::new(pool.clone()),
        SqliteDigestRepository::new(pool.clone()),
        Arc::new(EmbeddingAdapter::fallback_only(DIMENSION)),
        BoxFactExtractor::new(HeuristicExtractor::new()),
        summarizer,
        EngineConfig::default(),
    );
    (engine, pool)
}

/// Signals `entered` on each call, then parks until `release` fires.
struct GatedSummarizer {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Summarizer for GatedSummarizer {
    fn name(&self) -> &str {
        "gated"
    }

    async fn summarize(&self, text: &str, _stage: SummaryStage) -> Result<String, SummarizeError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(format!("- {}", text.lines().next().unwrap_or_default()))
    }
}

fn conversation(owner: &str, messages: &[(MessageRole, &str)]) -> NewConversation {
    NewConversation {
        owner: owner.to_string(),
        project: None,
        title: None,
        messages: messages
            .iter()
            .map(|(role, content)| NewMessage::new(*role, *content))
            .collect(),
    }
}

#[tokio::test]
async fn test_fallback_embeddings_are_deterministic() {
    let (engine, _pool) = engine().await;
    let a = engine.embedder().embed("dark mode everywhere").await;
    let b = engine.embedder().embed("dark mode everywhere").await;
    assert_eq!(a, b);
    assert_eq!(a.source, EmbeddingSource::Fallback);
    assert_eq!(a.vector.len(), DIMENSION);
}

#[tokio::test]
async fn test_archive_preserves_order_and_rejects_invalid_input() {
    let (engine, _pool) = engine().await;

    let archived = engine
        .archive(conversation(
            "alice",
            &[
                (MessageRole::User, "first"),
                (MessageRole::Assistant, "second"),
                (MessageRole::User, "third"),
            ],
        ))
        .await
        .unwrap();
    let loaded = engine.get_conversation(&archived.conversation.id).await.unwrap();
    let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["first", "second", "third"]);
    assert!(loaded
        .messages
        .iter()
        .all(|m| m.embedding_status == EmbeddingStatus::Pending));

    // One blank message rejects the whole conversation.
    let err = engine
        .archive(conversation(
            "alice",
            &[(MessageRole::User, "fine"), (MessageRole::User, "   ")],
        ))
        .await;
    assert!(matches!(err, Err(MemoryError::Validation(_))));
    assert_eq!(engine.list_conversations(None, None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_messages_become_searchable_after_sweep() {
    let (engine, _pool) = engine().await;
    let now = Utc::now();

    let mut older = conversation("alice", &[(MessageRole::User, "deploy the staging cluster")]);
    older.messages[0].created_at = Some(now - Duration::hours(1));
    let older = engine.archive(older).await.unwrap();
    let newer = engine
        .archive(conversation("alice", &[(MessageRole::User, "deploy the staging cluster")]))
        .await
        .unwrap();

    let scope = SearchScope::for_owner("alice");
    let before = engine.search("staging cluster", 5, &scope).await.unwrap();
    assert!(before.hits.is_empty());

    let report = engine.run_maintenance_sweep().await.unwrap();
    assert_eq!(report.embedded_with_fallback, 2);
    assert_eq!(report.embedded, 0);

    let after = engine.search("staging cluster", 5, &scope).await.unwrap();
    assert_eq!(after.hits.len(), 2);
    // Identical content ties on score; the newer message wins.
    assert_eq!(after.hits[0].conversation.id, newer.conversation.id);
    assert_eq!(after.hits[1].conversation.id, older.conversation.id);

    let other = engine
        .search("staging cluster", 5, &SearchScope::for_owner("bob"))
        .await
        .unwrap();
    assert!(other.hits.is_empty());
}

#[tokio::test]
async fn test_preference_is_extracted_once_and_surfaces_in_search() {
    let (engine, _pool) = engine().await;

    let archived = engine
        .archive(conversation(
            "alice",
            &[(MessageRole::User, "I prefer dark mode in every editor.")],
        ))
        .await
        .unwrap();
    engine
        .archive(conversation(
            "alice",
            &[(MessageRole::User, "Book the train tickets for Friday.")],
        ))
        .await
        .unwrap();
    let message_id = archived.messages[0].id;

    let report = engine.run_maintenance_sweep().await.unwrap();
    assert_eq!(report.messages_merged, 2);

    let preferences = engine.list_facts(Some(FactKind::Preference), 10).await.unwrap();
    assert_eq!(preferences.len(), 1);
    assert_eq!(preferences[0].value, "dark mode");
    assert_eq!(preferences[0].sources, vec![message_id]);

    // A second sweep finds nothing left to merge.
    let again = engine.run_maintenance_sweep().await.unwrap();
    assert_eq!(again.messages_merged, 0);
    let preferences = engine.list_facts(Some(FactKind::Preference), 10).await.unwrap();
    assert_eq!(preferences[0].sources.len(), 1);

    let results = engine
        .search("UI theme preference", 3, &SearchScope::for_owner("alice"))
        .await
        .unwrap();
    assert!(results.hits.iter().any(|h| h.message.id == message_id));
    assert!(results.facts.iter().any(|f| f.value == "dark mode"));

    let loaded = engine.get_conversation(&archived.conversation.id).await.unwrap();
    assert_eq!(loaded.messages[0].extraction_status, ExtractionStatus::Merged);
}

#[tokio::test]
async fn test_repeated_preference_corroborates() {
    let (engine, _pool) = engine().await;
    engine
        .archive(conversation("alice", &[(MessageRole::User, "I prefer dark mode.")]))
        .await
        .unwrap();
    engine
        .archive(conversation(
            "alice",
            &[(MessageRole::User, "I'd prefer the dark mode for slides.")],
        ))
        .await
        .unwrap();

    let report = engine.run_maintenance_sweep().await.unwrap();
    assert_eq!(report.facts_created, 1);
    assert_eq!(report.facts_corroborated, 1);

    let facts = engine.list_facts(Some(FactKind::Preference), 10).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].sources.len(), 2);
    assert!(facts[0].confidence > 0.8);
}

#[tokio::test]
async fn test_aged_conversation_is_compacted_and_hidden() {
    let (engine, _pool) = engine().await;
    let archived = engine
        .archive(conversation(
            "alice",
            &[
                (MessageRole::User, "Can we migrate the billing service to Postgres?"),
                (MessageRole::Assistant, "Yes, we should plan the migration next sprint."),
            ],
        ))
        .await
        .unwrap();
    let id = archived.conversation.id;

    let report = engine
        .run_maintenance_sweep_at(Utc::now() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.conversations_compacted, 1);

    let loaded = engine.get_conversation(&id).await.unwrap();
    assert_eq!(loaded.conversation.status, ConversationStatus::Summarized);

    let digests = engine.list_digests(Some("alice"), 10).await.unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].conversation_ids, vec![id]);
    assert_eq!(digests[0].window_start, loaded.messages[0].created_at);
    assert_eq!(digests[0].window_end, loaded.messages[1].created_at);

    let bundle = engine
        .retrieve(&RetrieveRequest::new("billing migration"))
        .await
        .unwrap();
    assert!(bundle.messages.is_empty());
    assert_eq!(bundle.digests.len(), 1);

    let mut archived_scope = RetrieveRequest::new("billing migration");
    archived_scope.scope = SearchScope::default().with_archived();
    let bundle = engine.retrieve(&archived_scope).await.unwrap();
    assert_eq!(bundle.messages.len(), 2);

    // Summarized conversations are closed to appends.
    let err = engine
        .append(&id, NewMessage::new(MessageRole::User, "one more thing"))
        .await;
    assert!(matches!(err, Err(MemoryError::Conflict(_))));
}

#[tokio::test]
async fn test_sweep_finishes_interrupted_compaction() {
    let (engine, pool) = engine().await;
    let archived = engine
        .archive(conversation("alice", &[(MessageRole::User, "Review the Q3 roadmap.")]))
        .await
        .unwrap();
    let id = archived.conversation.id;
    engine.run_maintenance_sweep().await.unwrap();

    // Digest written, status flip lost.
    let digests = SqliteDigestRepository::new(pool);
    let now = Utc::now();
    digests
        .insert_digest(&SummaryDigest {
            id: Uuid::now_v7(),
            owner: "alice".into(),
            window_start: archived.messages[0].created_at,
            window_end: archived.messages[0].created_at,
            conversation_ids: vec![id],
            text: "- Review the Q3 roadmap.".into(),
            highlights: Vec::new(),
            embedding: Some(engine.embedder().embed("- Review the Q3 roadmap.").await.vector),
            embedding_source: Some(EmbeddingSource::Fallback),
            created_at: now,
        })
        .await
        .unwrap();

    let report = engine
        .run_maintenance_sweep_at(now + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.conversations_recovered, 1);
    assert_eq!(report.conversations_compacted, 0);
    assert_eq!(digests.count_digests().await.unwrap(), 1);
    assert_eq!(
        engine.get_conversation(&id).await.unwrap().conversation.status,
        ConversationStatus::Summarized
    );
}

#[tokio::test]
async fn test_permanently_failed_embedding_blocks_compaction() {
    let (engine, pool) = engine().await;
    let archived = engine
        .archive(conversation(
            "alice",
            &[(MessageRole::User, "alpha"), (MessageRole::User, "beta")],
        ))
        .await
        .unwrap();
    let stuck = archived.messages[1].id;

    let archive = SqliteArchiveRepository::new(pool);
    for _ in 0..3 {
        archive.record_embedding_failure(&stuck, "provider down").await.unwrap();
    }

    let report = engine
        .run_maintenance_sweep_at(Utc::now() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.embedded_with_fallback, 1);
    assert_eq!(report.conversations_compacted, 0);

    let status = engine.status().await.unwrap();
    assert_eq!(status.failed_embeddings, 1);
    assert_eq!(status.active_conversations, 1);
    assert_eq!(status.digests, 0);
}

#[tokio::test]
async fn test_reembed_removes_message_from_search_until_next_sweep() {
    let (engine, _pool) = engine().await;
    let archived = engine
        .archive(conversation("alice", &[(MessageRole::User, "quarterly report")]))
        .await
        .unwrap();
    let id = archived.messages[0].id;
    engine.run_maintenance_sweep().await.unwrap();

    engine.reembed_message(&id).await.unwrap();
    let hits = engine
        .search("quarterly report", 5, &SearchScope::default())
        .await
        .unwrap()
        .hits;
    assert!(hits.is_empty());

    engine.run_maintenance_sweep().await.unwrap();
    let hits = engine
        .search("quarterly report", 5, &SearchScope::default())
        .await
        .unwrap()
        .hits;
    assert_eq!(hits.len(), 1);

    let err = engine.reembed_message(&Uuid::now_v7()).await;
    assert!(matches!(err, Err(MemoryError::NotFound(_))));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let (engine, _pool) = engine().await;
    let scope = SearchScope::default();

    assert!(matches!(
        engine.search("  ", 5, &scope).await,
        Err(MemoryError::Validation(_))
    ));
    assert!(matches!(
        engine.search("theme", 0, &scope).await,
        Err(MemoryError::Validation(_))
    ));
    assert!(matches!(
        engine.search("theme", 101, &scope).await,
        Err(MemoryError::Validation(_))
    ));

    let mut request = RetrieveRequest::new("theme");
    request.k_messages = 0;
    request.k_facts = 0;
    request.k_digests = 0;
    assert!(matches!(
        engine.retrieve(&request).await,
        Err(MemoryError::Validation(_))
    ));

    assert!(matches!(
        engine.archive(conversation("alice", &[])).await,
        Err(MemoryError::Validation(_))
    ));
    assert!(matches!(
        engine.get_conversation(&Uuid::now_v7()).await,
        Err(MemoryError::NotFound(_))
    ));
    assert!(matches!(
        engine
            .append(&Uuid::now_v7(), NewMessage::new(MessageRole::User, "hi"))
            .await,
        Err(MemoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_dark_mode_conversation_yields_one_sourced_preference() {
    let (engine, _pool) = engine().await;
    let archived = engine
        .archive(conversation(
            "alice",
            &[
                (MessageRole::User, "What theme should my editor use? I prefer dark mode."),
                (
                    MessageRole::Assistant,
                    "Noted: you prefer dark mode, so I'll suggest dark themes.",
                ),
                (MessageRole::User, "Great, thanks."),
            ],
        ))
        .await
        .unwrap();
    let stated = archived.messages[0].id;

    engine.run_maintenance_sweep().await.unwrap();

    let results = engine
        .search("UI theme preference", 3, &SearchScope::for_owner("alice"))
        .await
        .unwrap();
    assert!(results.hits.len() <= 3);
    assert!(results.hits.iter().any(|h| h.message.id == stated));

    let preferences = engine.list_facts(Some(FactKind::Preference), 10).await.unwrap();
    assert_eq!(preferences.len(), 1);
    assert_eq!(preferences[0].value, "dark mode");
    assert_eq!(preferences[0].sources, vec![stated]);
}

#[tokio::test]
async fn test_append_during_compaction_keeps_conversation_active() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (engine, _pool) = engine_with(BoxSummarizer::new(GatedSummarizer {
        entered: entered.clone(),
        release: release.clone(),
    }))
    .await;
    let engine = Arc::new(engine);

    let archived = engine
        .archive(conversation(
            "alice",
            &[(MessageRole::User, "Plan the billing migration to Postgres.")],
        ))
        .await
        .unwrap();
    let id = archived.conversation.id;

    let sweep = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .run_maintenance_sweep_at(Utc::now() + Duration::days(30))
                .await
        })
    };

    // The sweep is parked inside the summarizer; append behind its back.
    entered.notified().await;
    let late = engine
        .append(&id, NewMessage::new(MessageRole::User, "Also move the invoices table."))
        .await
        .unwrap();
    release.notify_one();

    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.conversations_compacted, 0);
    assert_eq!(report.compaction_failures, 1);

    let loaded = engine.get_conversation(&id).await.unwrap();
    assert_eq!(loaded.conversation.status, ConversationStatus::Active);
    assert_eq!(loaded.conversation.compaction_attempts, 1);
    assert_eq!(engine.status().await.unwrap().digests, 0);

    // The late message is indexed by the next sweep and stays searchable.
    let report = engine.run_maintenance_sweep().await.unwrap();
    assert_eq!(report.embedded_with_fallback, 1);
    let hits = engine
        .search("invoices table", 5, &SearchScope::for_owner("alice"))
        .await
        .unwrap()
        .hits;
    assert!(hits.iter().any(|h| h.message.id == late.id));

    // Once it ages, the conversation compacts with both messages covered.
    release.notify_one();
    let report = engine
        .run_maintenance_sweep_at(Utc::now() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.conversations_compacted, 1);
    let digests = engine.list_digests(Some("alice"), 10).await.unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].window_end, late.created_at);
    assert_eq!(
        engine.get_conversation(&id).await.unwrap().conversation.status,
        ConversationStatus::Summarized
    );
}

#[tokio::test]
async fn test_stale_digest_is_rebuilt_instead_of_recovered() {
    let (engine, pool) = engine().await;
    let archived = engine
        .archive(conversation("alice", &[(MessageRole::User, "Review the Q3 roadmap.")]))
        .await
        .unwrap();
    let id = archived.conversation.id;

    // Digest written for the first message only, then a second one arrives.
    let digests = SqliteDigestRepository::new(pool);
    let stale = SummaryDigest {
        id: Uuid::now_v7(),
        owner: "alice".into(),
        window_start: archived.messages[0].created_at,
        window_end: archived.messages[0].created_at,
        conversation_ids: vec![id],
        text: "- Review the Q3 roadmap.".into(),
        highlights: Vec::new(),
        embedding: Some(engine.embedder().embed("- Review the Q3 roadmap.").await.vector),
        embedding_source: Some(EmbeddingSource::Fallback),
        created_at: Utc::now(),
    };
    digests.insert_digest(&stale).await.unwrap();
    let late = engine
        .append(&id, NewMessage::new(MessageRole::Assistant, "Roadmap review booked for Monday."))
        .await
        .unwrap();

    let report = engine
        .run_maintenance_sweep_at(Utc::now() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.conversations_compacted, 1);
    assert_eq!(report.conversations_recovered, 0);

    let digest = digests.find_digest_for_conversation(&id).await.unwrap().unwrap();
    assert_ne!(digest.id, stale.id);
    assert_eq!(digest.window_end, late.created_at);
    assert_eq!(digests.count_digests().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reassigned_conversation_follows_project_scope() {
    let (engine, _pool) = engine().await;
    let archived = engine
        .archive(conversation("alice", &[(MessageRole::User, "atlas launch checklist")]))
        .await
        .unwrap();
    let id = archived.conversation.id;
    engine.run_maintenance_sweep().await.unwrap();

    let atlas_only = SearchScope {
        project: Some("atlas".into()),
        include_general: false,
        ..SearchScope::for_owner("alice")
    };
    let hits = engine.search("launch checklist", 5, &atlas_only).await.unwrap().hits;
    assert!(hits.is_empty());

    let moved = engine.reassign_project(&id, Some("atlas")).await.unwrap();
    assert_eq!(moved.project.as_deref(), Some("atlas"));
    let hits = engine.search("launch checklist", 5, &atlas_only).await.unwrap().hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].conversation.project.as_deref(), Some("atlas"));

    engine.reassign_project(&id, None).await.unwrap();
    let hits = engine.search("launch checklist", 5, &atlas_only).await.unwrap().hits;
    assert!(hits.is_empty());

    let err = engine.reassign_project(&Uuid::now_v7(), Some("atlas")).await;
    assert!(matches!(err, Err(MemoryError::NotFound(_))));
}

#[tokio::test]
async fn test_search_facts_do_not_leak_other_owners_sources() {
    let (engine, _pool) = engine().await;
    let alice = engine
        .archive(conversation("alice", &[(MessageRole::User, "I prefer dark mode.")]))
        .await
        .unwrap();
    engine
        .archive(conversation("bob", &[(MessageRole::User, "I prefer dark mode.")]))
        .await
        .unwrap();
    engine.run_maintenance_sweep().await.unwrap();

    let results = engine
        .search("dark mode", 5, &SearchScope::for_owner("alice"))
        .await
        .unwrap();
    let fact = results.facts.iter().find(|f| f.value == "dark mode").unwrap();
    assert_eq!(fact.sources, vec![alice.messages[0].id]);

    // The graph itself keeps both sources.
    let stored = engine.list_facts(Some(FactKind::Preference), 10).await.unwrap();
    assert_eq!(stored[0].sources.len(), 2);
}
