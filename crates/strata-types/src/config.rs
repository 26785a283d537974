//! Global configuration types for Strata.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! database location, embedding provider, summarization, authentication,
//! maintenance sweep bounds and the HTTP listener.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the memory service.
///
/// Loaded from `~/.strata/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// SQLite connection string. Defaults to `{data_dir}/strata.db`.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Remote embedding provider settings.
///
/// Without an `api_key` every embedding uses the deterministic fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension. Derived from the model name when absent.
    #[serde(default)]
    pub dimension: Option<usize>,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_timeout_ms() -> u64 {
    10_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: None,
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the embedding dimension: explicit setting, else by model name.
    pub fn resolved_dimension(&self) -> usize {
        self.dimension
            .filter(|d| *d > 0)
            .unwrap_or_else(|| dimension_for_model(&self.model))
    }
}

/// Default vector dimension for a model name.
pub fn dimension_for_model(model: &str) -> usize {
    if model.contains("large") { 3072 } else { 1536 }
}

/// Chat-completion settings used for summarization and fact extraction.
///
/// Only used when `enabled` is set and an embedding API key is present,
/// since both calls go to the same provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Defaults to the embedding base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_llm_model(),
            base_url: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Shared-secret authentication. Disabled when no secret is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub shared_secret: Option<String>,
}

/// Bounds for the maintenance sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Maximum items each phase processes per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts before an item is marked permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Conversations whose newest message is older than this are compacted.
    #[serde(default = "default_compaction_age_hours")]
    pub compaction_age_hours: u64,

    /// Transcript size above which summarization is split into chunks.
    #[serde(default = "default_summary_chunk_chars")]
    pub summary_chunk_chars: usize,

    /// Interval of the background sweep in `serve`. Zero disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_batch_size() -> u32 {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_compaction_age_hours() -> u64 {
    24 * 7
}

fn default_summary_chunk_chars() -> usize {
    45_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            compaction_age_hours: default_compaction_age_hours(),
            summary_chunk_chars: default_summary_chunk_chars(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8420
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
