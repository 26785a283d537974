//! KnowledgeRepository trait definition.

use chrono::{DateTime, Utc};
use strata_types::error::RepositoryError;
use strata_types::knowledge::{FactKind, KnowledgeFact, MergeOutcome, ScoredFact};
use uuid::Uuid;

/// A normalized candidate ready to merge.
#[derive(Debug, Clone)]
pub struct PreparedFact {
    pub kind: FactKind,
    /// Already normalized for `kind`.
    pub value: String,
    pub confidence: f64,
    /// Used only when the fact is created.
    pub embedding: Vec<f32>,
}

/// Repository trait for the knowledge graph.
pub trait KnowledgeRepository: Send + Sync {
    /// Merge facts sourced from one message and mark the message `merged`,
    /// in a single transaction.
    ///
    /// A `(fact, message)` pair is recorded at most once; confidence and
    /// `last_seen` change only when a new pair is recorded. Returns one
    /// outcome per input fact.
    fn merge_from_message(
        &self,
        message_id: &Uuid,
        facts: &[PreparedFact],
        seen_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<MergeOutcome>, RepositoryError>> + Send;

    fn get_fact(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<KnowledgeFact>, RepositoryError>> + Send;

    /// Look up a fact by kind and normalized value.
    fn find_fact(
        &self,
        kind: FactKind,
        value: &str,
    ) -> impl std::future::Future<Output = Result<Option<KnowledgeFact>, RepositoryError>> + Send;

    /// Facts ordered by confidence descending, then `last_seen` descending.
    fn list_facts(
        &self,
        kind: Option<FactKind>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<KnowledgeFact>, RepositoryError>> + Send;

    /// Facts with at least one source among `message_ids`.
    ///
    /// Each fact's `sources` is narrowed to messages owned by the owners of
    /// `message_ids`, so one owner's hits never reveal another's messages.
    fn facts_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> impl std::future::Future<Output = Result<Vec<KnowledgeFact>, RepositoryError>> + Send;

    /// Facts ranked by similarity of their embedding to `query`.
    fn top_facts(
        &self,
        query: &[f32],
        k: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredFact>, RepositoryError>> + Send;

    fn count_facts(&self) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
