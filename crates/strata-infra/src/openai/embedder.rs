//! OpenAI-compatible remote embedder.
//!
//! The API key is wrapped in [`SecretString`] and only exposed when the
//! `Authorization` header is built.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use strata_core::embedding::Embedder;
use strata_types::config::dimension_for_model;
use strata_types::error::EmbeddingError;

use super::types::{EmbeddingsRequest, EmbeddingsResponse};

/// Embedder backed by a `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

// No Debug: keeps the client and key out of logs entirely.

impl OpenAiEmbedder {
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            timeout,
        })
    }

    /// Only sent when it differs from the model's native width.
    fn requested_dimensions(&self) -> Option<usize> {
        (self.dimension != dimension_for_model(&self.model)).then_some(self.dimension)
    }
}

impl Embedder for OpenAiEmbedder {
    #[tracing::instrument(name = "embedding.remote", skip(self, texts), fields(model = %self.model, count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    EmbeddingError::Provider(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => EmbeddingError::RateLimited,
                _ => EmbeddingError::Provider(format!("HTTP {status}: {error_body}")),
            });
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(format!("failed to parse response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in parsed.data {
            let slot = ordered
                .get_mut(item.index)
                .ok_or_else(|| EmbeddingError::Malformed(format!("index {} out of range", item.index)))?;
            *slot = Some(item.embedding);
        }
        ordered
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| EmbeddingError::Malformed(format!("missing embedding {i}"))))
            .collect()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(base_url: &str, dimension: usize) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            SecretString::from("sk-test".to_string()),
            base_url,
            "text-embedding-3-small",
            dimension,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn embed_reorders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let vectors = embedder(&server.uri(), 2)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = embedder(&server.uri(), 2).embed(&["a".to_string()]).await;
        assert!(matches!(err, Err(EmbeddingError::RateLimited)));
    }

    #[tokio::test]
    async fn embed_rejects_short_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let err = embedder(&server.uri(), 2)
            .embed(&["a".to_string(), "b".to_string()])
            .await;
        assert!(matches!(err, Err(EmbeddingError::Malformed(_))));
    }

    #[test]
    fn dimensions_only_sent_when_overridden() {
        assert_eq!(embedder("http://localhost", 1536).requested_dimensions(), None);
        assert_eq!(embedder("http://localhost/", 256).requested_dimensions(), Some(256));
        assert_eq!(embedder("http://localhost/", 256).base_url, "http://localhost");
    }
}
