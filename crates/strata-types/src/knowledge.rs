//! Knowledge graph types for Strata.
//!
//! Facts are distilled from archived messages and merged across
//! conversations. They are append/merge-only: new evidence raises
//! confidence and extends the source set, nothing deletes a fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Type of a knowledge fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Preference,
    Entity,
    Pattern,
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactKind::Preference => write!(f, "preference"),
            FactKind::Entity => write!(f, "entity"),
            FactKind::Pattern => write!(f, "pattern"),
        }
    }
}

impl FromStr for FactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(FactKind::Preference),
            "entity" => Ok(FactKind::Entity),
            "pattern" => Ok(FactKind::Pattern),
            other => Err(format!("invalid fact kind: '{other}'")),
        }
    }
}

/// A fact produced by an extractor, before merging into the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFact {
    pub kind: FactKind,
    /// Raw value as extracted; normalized at merge time.
    pub value: String,
    /// Extractor confidence in [0, 1].
    pub confidence: f64,
}

impl CandidateFact {
    pub fn new(kind: FactKind, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence: clamp_confidence(confidence),
        }
    }
}

/// A merged knowledge fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub id: Uuid,
    pub kind: FactKind,
    /// Normalized value; `(kind, value)` is unique.
    pub value: String,
    pub confidence: f64,
    /// Messages corroborating this fact, each counted once.
    pub sources: Vec<Uuid>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A fact ranked against a query vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFact {
    pub score: f32,
    pub fact: KnowledgeFact,
}

/// Outcome of merging one candidate into the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOutcome {
    /// A new fact was created.
    Created,
    /// An existing fact gained a new source message.
    Corroborated,
    /// The (fact, message) pair was already recorded; nothing changed.
    Duplicate,
}

/// Clamp a confidence score into [0, 1], mapping NaN to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Combine prior and new confidence as independent evidence, capped at 1.0.
pub fn combine_confidence(prior: f64, new: f64) -> f64 {
    let p = clamp_confidence(prior);
    let q = clamp_confidence(new);
    (1.0 - (1.0 - p) * (1.0 - q)).min(1.0)
}
