//! Embedding adapter with deterministic fallback.
//!
//! Tries the primary (remote) embedder under a timeout. Any failure --
//! timeout, rate limit, provider error, or a malformed batch -- switches
//! the whole batch to the local [`HashEmbedder`]. Callers always receive a
//! vector, stamped with the path that produced it. There are no retries
//! here; retry policy belongs to the maintenance sweep.

use std::time::Duration;

use strata_types::archive::EmbeddingSource;
use strata_types::error::EmbeddingError;

use super::box_embedder::BoxEmbedder;
use super::embedder::Embedder;
use super::hash::HashEmbedder;
use super::vector::is_well_formed;

/// A vector plus the path that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub source: EmbeddingSource,
}

/// Infallible embedding front door used by the memory engine.
pub struct EmbeddingAdapter {
    primary: Option<BoxEmbedder>,
    fallback: HashEmbedder,
    timeout: Duration,
}

impl EmbeddingAdapter {
    /// Adapter with a remote primary embedder.
    ///
    /// The fallback uses the primary's dimension so both paths produce
    /// vectors of the same width.
    pub fn new(primary: BoxEmbedder, timeout: Duration) -> Self {
        let fallback = HashEmbedder::new(primary.dimension());
        Self {
            primary: Some(primary),
            fallback,
            timeout,
        }
    }

    /// Adapter that always uses the hash fallback (no API key configured).
    pub fn fallback_only(dimension: usize) -> Self {
        Self {
            primary: None,
            fallback: HashEmbedder::new(dimension),
            timeout: Duration::ZERO,
        }
    }

    pub fn dimension(&self) -> usize {
        self.fallback.dimension()
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Name of the model used on the primary path, or the fallback name.
    pub fn model_name(&self) -> &str {
        match &self.primary {
            Some(p) => p.model_name(),
            None => "hash-fallback",
        }
    }

    /// Embed one text.
    pub async fn embed(&self, text: &str) -> Embedding {
        let mut out = self.embed_batch(&[text.to_string()]).await;
        match out.pop() {
            Some(e) => e,
            None => self.fallback_embedding(text),
        }
    }

    /// Embed a batch, returning one embedding per text in input order.
    #[tracing::instrument(name = "embedding.batch", skip(self, texts), fields(count = texts.len()))]
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Embedding> {
        if texts.is_empty() {
            return Vec::new();
        }

        if let Some(primary) = &self.primary {
            match self.call_primary(primary, texts).await {
                Ok(vectors) => {
                    return vectors
                        .into_iter()
                        .map(|vector| Embedding {
                            vector,
                            source: EmbeddingSource::Model,
                        })
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(
                        model = primary.model_name(),
                        error = %e,
                        "Primary embedder failed, using hash fallback"
                    );
                }
            }
        }

        texts.iter().map(|t| self.fallback_embedding(t)).collect()
    }

    /// The deterministic fallback vector for `text`.
    pub fn fallback_embedding(&self, text: &str) -> Embedding {
        Embedding {
            vector: self.fallback.embed_one(text),
            source: EmbeddingSource::Fallback,
        }
    }

    async fn call_primary(
        &self,
        primary: &BoxEmbedder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = match tokio::time::timeout(self.timeout, primary.embed(texts)).await {
            Ok(result) => result?,
            Err(_) => return Err(EmbeddingError::Timeout(self.timeout.as_millis() as u64)),
        };

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let dimension = self.dimension();
        if let Some(bad) = vectors.iter().position(|v| !is_well_formed(v, dimension)) {
            return Err(EmbeddingError::Malformed(format!(
                "vector {bad} is not a finite {dimension}-dimensional vector"
            )));
        }
        Ok(vectors)
    }
}
