//! Maintenance sweep reports and queue status.

use serde::{Deserialize, Serialize};

/// Counters from one bounded maintenance sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Messages that received a model embedding.
    pub embedded: u32,
    /// Messages that received a fallback embedding.
    pub embedded_with_fallback: u32,
    pub embedding_failures: u32,
    /// Messages moved to `merged`.
    pub messages_merged: u32,
    pub facts_created: u32,
    pub facts_corroborated: u32,
    pub extraction_failures: u32,
    pub conversations_compacted: u32,
    /// Conversations that already had a digest and only needed the status flip.
    pub conversations_recovered: u32,
    pub compaction_failures: u32,
    pub duration_ms: u64,
}

impl SweepReport {
    /// True when the sweep found no work at all.
    pub fn is_idle(&self) -> bool {
        self.embedded
            + self.embedded_with_fallback
            + self.embedding_failures
            + self.messages_merged
            + self.extraction_failures
            + self.conversations_compacted
            + self.conversations_recovered
            + self.compaction_failures
            == 0
    }
}

/// Queue depths and permanent failures, for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStatus {
    pub active_conversations: u64,
    pub summarized_conversations: u64,
    pub messages: u64,
    pub pending_embeddings: u64,
    /// Embeddings that exhausted their retry budget.
    pub failed_embeddings: u64,
    pub pending_extractions: u64,
    /// Extractions that exhausted their retry budget.
    pub failed_extractions: u64,
    /// Conversations whose compaction exhausted its retry budget.
    pub failed_compactions: u64,
    pub facts: u64,
    pub digests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_report_is_idle() {
        assert!(SweepReport::default().is_idle());
        let report = SweepReport {
            conversations_recovered: 1,
            ..SweepReport::default()
        };
        assert!(!report.is_idle());
    }
}
