//! Summary digest types for Strata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::archive::EmbeddingSource;

/// A compressed digest covering one or more conversations.
///
/// Written before the covered conversations are flipped to `summarized`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDigest {
    pub id: Uuid,
    pub owner: String,
    /// Timestamp of the oldest covered message.
    pub window_start: DateTime<Utc>,
    /// Timestamp of the newest covered message.
    pub window_end: DateTime<Utc>,
    pub conversation_ids: Vec<Uuid>,
    pub text: String,
    /// Short topic list parsed from the summary, if the summarizer emitted one.
    pub highlights: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_source: Option<EmbeddingSource>,
    pub created_at: DateTime<Utc>,
}

/// A digest ranked against a query vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDigest {
    pub score: f32,
    pub digest: SummaryDigest,
}
