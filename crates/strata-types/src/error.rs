use thiserror::Error;

/// Errors from repository operations (used by trait definitions in strata-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors returned by a remote embedding provider.
///
/// None of these reach callers of the memory engine: the embedding adapter
/// resolves every variant by falling back to the deterministic hash embedder.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding provider rate limited the request")]
    RateLimited,

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("no embedding provider configured")]
    Unavailable,
}

/// Errors from the pluggable summarization step.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("nothing to summarize")]
    EmptyInput,

    #[error("summarization provider error: {0}")]
    Provider(String),
}

/// Errors from a fact extractor.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction provider error: {0}")]
    Provider(String),

    #[error("invalid extraction output: {0}")]
    InvalidOutput(String),
}

/// Errors surfaced to callers of the memory engine.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl MemoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        MemoryError::Validation(message.into())
    }
}
