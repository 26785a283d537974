//! Summary compaction: summarizers and the compactor that drives them.

pub mod compactor;
pub mod extractive;
pub mod llm_summarizer;
pub mod summarizer;
pub mod transcript;

pub use compactor::{CompactionReport, SummaryCompactor};
pub use extractive::ExtractiveSummarizer;
pub use llm_summarizer::LlmSummarizer;
pub use summarizer::{BoxSummarizer, Summarizer, SummaryStage};
