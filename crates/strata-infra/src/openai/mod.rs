//! OpenAI-compatible embedding and chat-completion clients.
//!
//! Also provides the factories that turn [`GlobalConfig`] into the engine's
//! pluggable parts: the embedding adapter, the fact extractor and the
//! summarizer. Without an API key everything runs on the local fallbacks.

pub mod chat;
pub mod embedder;
pub mod types;

use std::time::Duration;

use secrecy::SecretString;

use strata_core::embedding::{BoxEmbedder, EmbeddingAdapter};
use strata_core::knowledge::{BoxFactExtractor, HeuristicExtractor, LlmFactExtractor};
use strata_core::llm::BoxLlmProvider;
use strata_core::summary::{BoxSummarizer, ExtractiveSummarizer, LlmSummarizer};
use strata_types::config::{EmbeddingConfig, GlobalConfig};

pub use chat::OpenAiChatProvider;
pub use embedder::OpenAiEmbedder;

/// Build the embedding adapter: remote primary when a key is configured,
/// hash fallback only otherwise.
pub fn create_embedding_adapter(config: &EmbeddingConfig) -> EmbeddingAdapter {
    let dimension = config.resolved_dimension();
    let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        tracing::info!(dimension, "No embedding API key; using deterministic fallback embeddings");
        return EmbeddingAdapter::fallback_only(dimension);
    };

    let timeout = Duration::from_millis(config.timeout_ms);
    match OpenAiEmbedder::new(
        SecretString::from(key.to_string()),
        config.base_url.clone(),
        config.model.clone(),
        dimension,
        timeout,
    ) {
        Ok(embedder) => {
            tracing::info!(model = %config.model, dimension, "Remote embeddings enabled");
            EmbeddingAdapter::new(BoxEmbedder::new(embedder), timeout)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create embedder; using fallback embeddings");
            EmbeddingAdapter::fallback_only(dimension)
        }
    }
}

/// Chat provider for the model-backed extractor and summarizer.
///
/// `None` unless `llm.enabled` is set and an embedding API key is present.
pub fn create_chat_provider(config: &GlobalConfig) -> Option<BoxLlmProvider> {
    if !config.llm.enabled {
        return None;
    }
    let Some(key) = config
        .embedding
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
    else {
        tracing::warn!("llm.enabled is set but no API key is configured; using local extractors");
        return None;
    };

    let base_url = config
        .llm
        .base_url
        .clone()
        .unwrap_or_else(|| config.embedding.base_url.clone());
    match OpenAiChatProvider::new(
        SecretString::from(key.to_string()),
        base_url,
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ) {
        Ok(provider) => Some(BoxLlmProvider::new(provider)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create chat provider; using local extractors");
            None
        }
    }
}

pub fn create_fact_extractor(config: &GlobalConfig) -> BoxFactExtractor {
    match create_chat_provider(config) {
        Some(provider) => BoxFactExtractor::new(LlmFactExtractor::new(provider)),
        None => BoxFactExtractor::new(HeuristicExtractor::new()),
    }
}

pub fn create_summarizer(config: &GlobalConfig) -> BoxSummarizer {
    match create_chat_provider(config) {
        Some(provider) => BoxSummarizer::new(LlmSummarizer::new(provider)),
        None => BoxSummarizer::new(ExtractiveSummarizer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_means_local_fallbacks() {
        let config = GlobalConfig::default();
        let adapter = create_embedding_adapter(&config.embedding);
        assert!(!adapter.has_primary());
        assert_eq!(adapter.dimension(), 1536);
        assert!(create_chat_provider(&config).is_none());
        assert_eq!(create_fact_extractor(&config).name(), "heuristic");
        assert_eq!(create_summarizer(&config).name(), "extractive");
    }

    #[test]
    fn llm_requires_opt_in() {
        let mut config = GlobalConfig::default();
        config.embedding.api_key = Some("sk-test".into());
        assert!(create_embedding_adapter(&config.embedding).has_primary());
        assert!(create_chat_provider(&config).is_none());

        config.llm.enabled = true;
        let provider = create_chat_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(create_summarizer(&config).name(), "llm");
    }

    #[test]
    fn blank_key_is_ignored() {
        let mut config = GlobalConfig::default();
        config.embedding.api_key = Some("  ".into());
        config.embedding.dimension = Some(32);
        let adapter = create_embedding_adapter(&config.embedding);
        assert!(!adapter.has_primary());
        assert_eq!(adapter.dimension(), 32);
    }
}
