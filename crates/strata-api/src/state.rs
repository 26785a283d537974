//! Application state wiring the memory engine together.
//!
//! AppState holds the engine used by both the CLI and the REST API. The
//! engine is generic over repository traits; AppState pins it to the
//! SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use strata_core::{EngineConfig, MemoryEngine};
use strata_infra::config::{load_global_config, resolve_data_dir, resolve_database_url};
use strata_infra::openai::{create_embedding_adapter, create_fact_extractor, create_summarizer};
use strata_infra::sqlite::{
    DatabasePool, SqliteArchiveRepository, SqliteDigestRepository, SqliteKnowledgeRepository,
};
use strata_types::config::GlobalConfig;

/// The engine pinned to the SQLite repositories.
pub type Engine =
    MemoryEngine<SqliteArchiveRepository, SqliteKnowledgeRepository, SqliteDigestRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    /// SHA-256 of the shared secret. `None` disables authentication.
    pub secret_digest: Option<[u8; 32]>,
}

impl AppState {
    /// Load config, open the database and wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let database_url = resolve_database_url(&config, &data_dir);
        let pool = DatabasePool::new(&database_url).await?;

        Ok(Self::from_parts(pool, config, data_dir))
    }

    /// Wire the engine over an open pool.
    pub fn from_parts(pool: DatabasePool, config: GlobalConfig, data_dir: PathBuf) -> Self {
        let engine = MemoryEngine::new(
            SqliteArchiveRepository::new(pool.clone()),
            SqliteKnowledgeRepository::new(pool.clone()),
            SqliteDigestRepository::new(pool),
            Arc::new(create_embedding_adapter(&config.embedding)),
            create_fact_extractor(&config),
            create_summarizer(&config),
            EngineConfig::from(&config.maintenance),
        );
        tracing::debug!(
            embedding_model = engine.embedder().model_name(),
            extractor = engine.extractor_name(),
            summarizer = engine.summarizer_name(),
            "Engine ready"
        );

        let secret_digest = config
            .auth
            .shared_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(hash_secret);

        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            data_dir,
            secret_digest,
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.secret_digest.is_some()
    }
}

pub fn hash_secret(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}
