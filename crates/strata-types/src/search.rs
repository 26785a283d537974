//! Search request and result types for Strata.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::archive::{Conversation, Message};
use crate::digest::ScoredDigest;
use crate::knowledge::{KnowledgeFact, ScoredFact};

/// Filters applied to message similarity search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchScope {
    /// Restrict to one owner. `None` searches every owner.
    #[serde(default)]
    pub owner: Option<String>,
    /// Restrict to one project. `None` searches every project.
    #[serde(default)]
    pub project: Option<String>,
    /// With `project` set, also match conversations that have no project.
    #[serde(default = "default_true")]
    pub include_general: bool,
    /// Also search conversations that have been summarized.
    #[serde(default)]
    pub include_archived: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            owner: None,
            project: None,
            include_general: true,
            include_archived: false,
        }
    }
}

impl SearchScope {
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn with_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }
}

/// A message id ranked by the similarity primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMessage {
    pub message_id: Uuid,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// A hydrated search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub message: Message,
    pub conversation: Conversation,
}

/// Ranked hits plus knowledge facts sourced from those hits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub facts: Vec<KnowledgeFact>,
}

/// Unified retrieval across the message, knowledge and summary layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default)]
    pub scope: SearchScope,
    #[serde(default = "default_k_messages")]
    pub k_messages: usize,
    #[serde(default = "default_k_facts")]
    pub k_facts: usize,
    #[serde(default = "default_k_digests")]
    pub k_digests: usize,
}

fn default_k_messages() -> usize {
    5
}

fn default_k_facts() -> usize {
    3
}

fn default_k_digests() -> usize {
    2
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope: SearchScope::default(),
            k_messages: default_k_messages(),
            k_facts: default_k_facts(),
            k_digests: default_k_digests(),
        }
    }
}

/// Result of a unified retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalBundle {
    pub messages: Vec<SearchHit>,
    pub facts: Vec<ScoredFact>,
    pub digests: Vec<ScoredDigest>,
}
