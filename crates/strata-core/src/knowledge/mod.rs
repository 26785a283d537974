//! Knowledge graph layer.
//!
//! Facts (preferences, entities, patterns) are extracted from archived
//! messages by a pluggable [`FactExtractor`], normalized per kind, and
//! merged into the graph by the [`KnowledgeGraphBuilder`].

pub mod builder;
pub mod extractor;
pub mod heuristic;
pub mod llm_extractor;
pub mod normalize;

pub use builder::{ExtractionReport, KnowledgeGraphBuilder};
pub use extractor::{BoxFactExtractor, FactExtractor};
pub use heuristic::HeuristicExtractor;
pub use llm_extractor::LlmFactExtractor;
pub use normalize::{FactNormalizer, ValueNormalizer};
