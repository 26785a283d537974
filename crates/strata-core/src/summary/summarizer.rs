//! Summarizer trait and its object-safe wrapper.
//!
//! Summarization is text in, text out. The compactor drives a map-reduce
//! over long transcripts, so each call is told which stage it serves.

use std::future::Future;
use std::pin::Pin;

use strata_types::error::SummarizeError;

/// Which step of the map-reduce a summarization call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStage {
    /// The whole transcript fits in one call.
    Single,
    /// One slice of a longer transcript (1-based index).
    Chunk { index: usize, total: usize },
    /// Merge partial summaries into one.
    Combine,
}

/// Text-in, text-out summarization capability.
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    fn summarize(
        &self,
        text: &str,
        stage: SummaryStage,
    ) -> impl Future<Output = Result<String, SummarizeError>> + Send;
}

/// Object-safe version of [`Summarizer`] with boxed futures.
pub trait SummarizerDyn: Send + Sync {
    fn name_dyn(&self) -> &str;

    fn summarize_boxed<'a>(
        &'a self,
        text: &'a str,
        stage: SummaryStage,
    ) -> Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>>;
}

impl<T: Summarizer> SummarizerDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }

    fn summarize_boxed<'a>(
        &'a self,
        text: &'a str,
        stage: SummaryStage,
    ) -> Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>> {
        Box::pin(self.summarize(text, stage))
    }
}

/// Type-erased summarizer for runtime selection.
pub struct BoxSummarizer {
    inner: Box<dyn SummarizerDyn + Send + Sync>,
}

impl BoxSummarizer {
    pub fn new<T: Summarizer + 'static>(summarizer: T) -> Self {
        Self {
            inner: Box::new(summarizer),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name_dyn()
    }

    pub async fn summarize(&self, text: &str, stage: SummaryStage) -> Result<String, SummarizeError> {
        self.inner.summarize_boxed(text, stage).await
    }
}
