//! Incremental knowledge graph builder.
//!
//! Drives the per-message state machine `unprocessed -> extracted -> merged`.
//! Extraction output is persisted before merging, so a crash between the
//! two steps resumes from the stored candidates instead of re-running the
//! extractor. Each message is merged at most once; a failing message is
//! recorded and skipped without blocking the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;

use strata_types::archive::Message;
use strata_types::error::RepositoryError;
use strata_types::knowledge::{CandidateFact, FactKind, MergeOutcome};

use super::extractor::BoxFactExtractor;
use super::normalize::FactNormalizer;
use crate::embedding::EmbeddingAdapter;
use crate::repository::{ArchiveRepository, ExtractionWork, KnowledgeRepository, PreparedFact};

/// Counters from one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub messages_merged: u32,
    pub facts_created: u32,
    pub facts_corroborated: u32,
    pub failures: u32,
}

/// Turns queued messages into merged knowledge facts.
pub struct KnowledgeGraphBuilder {
    extractor: BoxFactExtractor,
    normalizer: FactNormalizer,
    embedder: Arc<EmbeddingAdapter>,
}

impl KnowledgeGraphBuilder {
    pub fn new(extractor: BoxFactExtractor, embedder: Arc<EmbeddingAdapter>) -> Self {
        Self {
            extractor,
            normalizer: FactNormalizer::default(),
            embedder,
        }
    }

    /// Replace the per-kind normalizers that decide fact identity.
    pub fn with_normalizer(mut self, normalizer: FactNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    /// Process up to `limit` queued messages.
    #[tracing::instrument(name = "knowledge.sweep", skip(self, archive, knowledge))]
    pub async fn run<A, K>(
        &self,
        archive: &A,
        knowledge: &K,
        limit: u32,
        max_attempts: u32,
    ) -> Result<ExtractionReport, RepositoryError>
    where
        A: ArchiveRepository,
        K: KnowledgeRepository,
    {
        let queue = archive.list_extraction_queue(limit, max_attempts).await?;
        let mut report = ExtractionReport::default();

        for work in queue {
            let message_id = work.message.id;
            match self.process(archive, knowledge, work).await {
                Ok(outcomes) => {
                    report.messages_merged += 1;
                    for outcome in outcomes {
                        match outcome {
                            MergeOutcome::Created => report.facts_created += 1,
                            MergeOutcome::Corroborated => report.facts_corroborated += 1,
                            MergeOutcome::Duplicate => {}
                        }
                    }
                }
                Err(error) => {
                    report.failures += 1;
                    tracing::warn!(%message_id, %error, "Knowledge extraction failed");
                    if let Err(e) = archive.record_extraction_failure(&message_id, &error).await {
                        tracing::error!(%message_id, error = %e, "Failed to record extraction failure");
                    }
                }
            }
        }

        if report.messages_merged + report.failures > 0 {
            tracing::info!(
                merged = report.messages_merged,
                created = report.facts_created,
                corroborated = report.facts_corroborated,
                failures = report.failures,
                "Knowledge extraction pass complete"
            );
        }
        Ok(report)
    }

    async fn process<A, K>(
        &self,
        archive: &A,
        knowledge: &K,
        work: ExtractionWork,
    ) -> Result<Vec<MergeOutcome>, String>
    where
        A: ArchiveRepository,
        K: KnowledgeRepository,
    {
        let ExtractionWork {
            message,
            candidates,
        } = work;

        let candidates = match candidates {
            Some(stored) => stored,
            None => {
                let extracted = self
                    .extractor
                    .extract(&message)
                    .await
                    .map_err(|e| e.to_string())?;
                archive
                    .mark_extracted(&message.id, &extracted)
                    .await
                    .map_err(|e| e.to_string())?;
                extracted
            }
        };

        let prepared = self.prepare(&message, &candidates).await;
        knowledge
            .merge_from_message(&message.id, &prepared, message.created_at)
            .await
            .map_err(|e| e.to_string())
    }

    /// Normalize, drop empties, and collapse duplicates within one message.
    async fn prepare(&self, message: &Message, candidates: &[CandidateFact]) -> Vec<PreparedFact> {
        let mut by_key: HashMap<(FactKind, String), f64> = HashMap::new();
        let mut order: Vec<(FactKind, String)> = Vec::new();

        for candidate in candidates {
            let value = self.normalizer.normalize(candidate.kind, &candidate.value);
            if value.is_empty() {
                continue;
            }
            let key = (candidate.kind, value);
            match by_key.get_mut(&key) {
                Some(existing) => *existing = existing.max(candidate.confidence),
                None => {
                    by_key.insert(key.clone(), candidate.confidence);
                    order.push(key);
                }
            }
        }

        if order.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = order
            .iter()
            .map(|(kind, value)| fact_embedding_text(*kind, value))
            .collect();
        let embeddings = self.embedder.embed_batch(&texts).await;

        tracing::debug!(message_id = %message.id, facts = order.len(), "Prepared facts");

        order
            .into_iter()
            .zip(embeddings)
            .map(|((kind, value), embedding)| {
                let confidence = by_key.get(&(kind, value.clone())).copied().unwrap_or(0.0);
                PreparedFact {
                    kind,
                    value,
                    confidence,
                    embedding: embedding.vector,
                }
            })
            .collect()
    }
}

/// Text embedded for fact-level retrieval.
pub fn fact_embedding_text(kind: FactKind, value: &str) -> String {
    format!("{kind}: {value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::knowledge::{HeuristicExtractor, ValueNormalizer};
    use chrono::Utc;
    use strata_types::archive::{EmbeddingStatus, ExtractionStatus, MessageRole};
    use uuid::Uuid;

    fn message(content: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id: Uuid::now_v7(),
            position: 0,
            role: MessageRole::User,
            content: content.to_string(),
            token_count: 0,
            created_at: Utc::now(),
            embedding: None,
            embedding_status: EmbeddingStatus::Ready,
            embedding_source: None,
            embedding_attempts: 0,
            extraction_status: ExtractionStatus::Unprocessed,
            extraction_attempts: 0,
            last_error: None,
        }
    }

    fn builder() -> KnowledgeGraphBuilder {
        KnowledgeGraphBuilder::new(
            BoxFactExtractor::new(HeuristicExtractor::new()),
            Arc::new(EmbeddingAdapter::fallback_only(8)),
        )
    }

    #[test]
    fn fact_embedding_text_format() {
        assert_eq!(fact_embedding_text(FactKind::Preference, "dark mode"), "preference: dark mode");
    }

    #[tokio::test]
    async fn prepare_collapses_duplicates_keeping_the_highest_confidence() {
        let candidates = [
            CandidateFact::new(FactKind::Preference, "Dark mode", 0.6),
            CandidateFact::new(FactKind::Preference, "the dark mode in vim", 0.9),
            CandidateFact::new(FactKind::Entity, "  ", 0.9),
        ];
        let prepared = builder().prepare(&message("x"), &candidates).await;
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].value, "dark mode");
        assert!((prepared[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(prepared[0].embedding.len(), 8);
    }

    #[tokio::test]
    async fn custom_normalizer_decides_fact_identity() {
        struct FirstWord;
        impl ValueNormalizer for FirstWord {
            fn normalize(&self, value: &str) -> String {
                value
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_lowercase()
            }
        }

        let builder = builder()
            .with_normalizer(FactNormalizer::default().with(FactKind::Entity, FirstWord));
        let candidates = [
            CandidateFact::new(FactKind::Entity, "Postgres 16", 0.5),
            CandidateFact::new(FactKind::Entity, "postgres cluster", 0.7),
            CandidateFact::new(FactKind::Preference, "the Dark Mode", 0.8),
        ];
        let prepared = builder.prepare(&message("x"), &candidates).await;

        let values: Vec<(FactKind, &str)> =
            prepared.iter().map(|p| (p.kind, p.value.as_str())).collect();
        assert_eq!(
            values,
            vec![(FactKind::Entity, "postgres"), (FactKind::Preference, "dark mode")]
        );
        assert!((prepared[0].confidence - 0.7).abs() < 1e-9);
    }
}
