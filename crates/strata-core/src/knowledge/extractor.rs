//! FactExtractor trait and its object-safe wrapper.

use std::future::Future;
use std::pin::Pin;

use strata_types::archive::Message;
use strata_types::error::ExtractionError;
use strata_types::knowledge::CandidateFact;

/// Turns one archived message into zero or more candidate facts.
///
/// Extractors are pluggable; the builder only relies on the returned
/// candidates having a kind, a raw value, and a confidence.
pub trait FactExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(
        &self,
        message: &Message,
    ) -> impl Future<Output = Result<Vec<CandidateFact>, ExtractionError>> + Send;
}

/// Object-safe version of [`FactExtractor`] with boxed futures.
pub trait FactExtractorDyn: Send + Sync {
    fn name_dyn(&self) -> &str;

    fn extract_boxed<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CandidateFact>, ExtractionError>> + Send + 'a>>;
}

impl<T: FactExtractor> FactExtractorDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }

    fn extract_boxed<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CandidateFact>, ExtractionError>> + Send + 'a>>
    {
        Box::pin(self.extract(message))
    }
}

/// Type-erased extractor for runtime selection (heuristic or model-backed).
pub struct BoxFactExtractor {
    inner: Box<dyn FactExtractorDyn + Send + Sync>,
}

impl BoxFactExtractor {
    pub fn new<T: FactExtractor + 'static>(extractor: T) -> Self {
        Self {
            inner: Box::new(extractor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name_dyn()
    }

    pub async fn extract(&self, message: &Message) -> Result<Vec<CandidateFact>, ExtractionError> {
        self.inner.extract_boxed(message).await
    }
}
