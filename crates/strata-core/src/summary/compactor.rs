//! Rolls aged conversations up into summary digests.
//!
//! Compaction is two-phase: the digest (with its covered-conversation
//! links) is written first, then the conversation is flipped to
//! `summarized`. A conversation that already has a covering digest only
//! gets the status flip, so a crash between the phases heals on the next
//! sweep without producing a second digest.
//!
//! The flip is refused when a message was appended after the conversation
//! was selected. The fresh digest is then dropped and the attempt counts as
//! a failure, so the conversation is compacted again once the new message
//! is embedded and ages past the cutoff.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use strata_types::archive::{Conversation, Message};
use strata_types::digest::SummaryDigest;
use strata_types::error::RepositoryError;

use super::summarizer::BoxSummarizer;
use super::transcript::{parse_highlights, render_transcript, summarize_transcript};
use crate::embedding::EmbeddingAdapter;
use crate::repository::{ArchiveRepository, DigestRepository};

/// Counters from one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub compacted: u32,
    pub recovered: u32,
    pub failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Compacted,
    Recovered,
}

pub struct SummaryCompactor {
    summarizer: BoxSummarizer,
    embedder: Arc<EmbeddingAdapter>,
    compaction_age: Duration,
    chunk_chars: usize,
}

impl SummaryCompactor {
    pub fn new(
        summarizer: BoxSummarizer,
        embedder: Arc<EmbeddingAdapter>,
        compaction_age: Duration,
        chunk_chars: usize,
    ) -> Self {
        Self {
            summarizer,
            embedder,
            compaction_age,
            chunk_chars,
        }
    }

    pub fn summarizer_name(&self) -> &str {
        self.summarizer.name()
    }

    /// Conversations whose newest message predates this are eligible.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.compaction_age
    }

    /// Compact up to `limit` eligible conversations.
    #[tracing::instrument(name = "summary.sweep", skip(self, archive, digests))]
    pub async fn run<A, D>(
        &self,
        archive: &A,
        digests: &D,
        now: DateTime<Utc>,
        limit: u32,
        max_attempts: u32,
    ) -> Result<CompactionReport, RepositoryError>
    where
        A: ArchiveRepository,
        D: DigestRepository,
    {
        let candidates = archive
            .list_compaction_candidates(self.cutoff(now), limit, max_attempts)
            .await?;
        let mut report = CompactionReport::default();

        for conversation in candidates {
            let id = conversation.id;
            match self.compact_one(archive, digests, &conversation, now).await {
                Ok(Outcome::Compacted) => report.compacted += 1,
                Ok(Outcome::Recovered) => report.recovered += 1,
                Err(error) => {
                    report.failures += 1;
                    tracing::warn!(conversation_id = %id, %error, "Compaction failed");
                    if let Err(e) = archive.record_compaction_failure(&id, &error).await {
                        tracing::error!(conversation_id = %id, error = %e, "Failed to record compaction failure");
                    }
                }
            }
        }

        if report.compacted + report.recovered + report.failures > 0 {
            tracing::info!(
                compacted = report.compacted,
                recovered = report.recovered,
                failures = report.failures,
                "Compaction pass complete"
            );
        }
        Ok(report)
    }

    async fn compact_one<A, D>(
        &self,
        archive: &A,
        digests: &D,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Result<Outcome, String>
    where
        A: ArchiveRepository,
        D: DigestRepository,
    {
        let id = conversation.id;

        let archived = archive
            .get_conversation(&id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("conversation {id} disappeared before compaction"))?;
        let Some((window_start, window_end)) = time_window(&archived.messages) else {
            return Err("conversation has no messages".to_string());
        };

        if let Some(existing) = digests
            .find_digest_for_conversation(&id)
            .await
            .map_err(|e| e.to_string())?
        {
            if existing.window_end >= window_end {
                tracing::info!(conversation_id = %id, digest_id = %existing.id, "Digest already written; finishing status flip");
                self.flip(archive, &id).await?;
                return Ok(Outcome::Recovered);
            }
            tracing::info!(conversation_id = %id, digest_id = %existing.id, "Digest predates newer messages; rebuilding");
            digests
                .delete_digest(&existing.id)
                .await
                .map_err(|e| e.to_string())?;
        }

        let lines = render_transcript(&archived.messages);
        let text = summarize_transcript(&self.summarizer, &lines, self.chunk_chars)
            .await
            .map_err(|e| e.to_string())?;
        let highlights = parse_highlights(&text);
        let embedding = self.embedder.embed(&text).await;

        let digest = SummaryDigest {
            id: Uuid::now_v7(),
            owner: conversation.owner.clone(),
            window_start,
            window_end,
            conversation_ids: vec![id],
            text,
            highlights,
            embedding: Some(embedding.vector),
            embedding_source: Some(embedding.source),
            created_at: now,
        };

        let outcome = match digests.insert_digest(&digest).await {
            Ok(()) => {
                tracing::debug!(conversation_id = %id, digest_id = %digest.id, "Digest written");
                Outcome::Compacted
            }
            // Another sweep covered it between our check and the insert.
            Err(RepositoryError::Conflict(_)) => Outcome::Recovered,
            Err(e) => return Err(e.to_string()),
        };

        if let Err(error) = self.flip(archive, &id).await {
            if outcome == Outcome::Compacted {
                // A message arrived while summarizing; the digest no longer
                // covers the conversation. The next sweep starts over.
                if let Err(e) = digests.delete_digest(&digest.id).await {
                    tracing::error!(conversation_id = %id, digest_id = %digest.id, error = %e, "Failed to drop stale digest");
                }
            }
            return Err(error);
        }
        Ok(outcome)
    }

    async fn flip<A: ArchiveRepository>(&self, archive: &A, id: &Uuid) -> Result<(), String> {
        archive.mark_summarized(id).await.map_err(|e| match e {
            RepositoryError::Conflict(reason) => {
                format!("conversation changed during compaction: {reason}")
            }
            other => other.to_string(),
        })
    }
}

/// Earliest and latest message timestamps.
fn time_window(messages: &[Message]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = messages.iter().map(|m| m.created_at).min()?;
    let end = messages.iter().map(|m| m.created_at).max()?;
    Some((start, end))
}
