//! Global configuration loader for Strata.
//!
//! Reads `config.toml` from the data directory (`~/.strata/` by default)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when
//! the file is missing or malformed, then applies `STRATA_*` environment
//! overrides on top.

use std::path::{Path, PathBuf};

use strata_types::config::GlobalConfig;

use crate::sqlite::pool::default_database_url;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STRATA_DATA_DIR` environment variable
/// 2. `~/.strata`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STRATA_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".strata");
    }

    PathBuf::from(".strata")
}

/// Load `{data_dir}/config.toml` with environment overrides applied.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let mut config = read_config_file(data_dir).await;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

async fn read_config_file(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Apply `STRATA_*` overrides. Blank values are ignored.
///
/// `OPENAI_API_KEY` is honored when `STRATA_EMBEDDING_API_KEY` is unset.
pub fn apply_env_overrides(config: &mut GlobalConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = get("STRATA_DATABASE_URL") {
        config.database_url = Some(url);
    }
    if let Some(key) = get("STRATA_EMBEDDING_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
        config.embedding.api_key = Some(key);
    }
    if let Some(model) = get("STRATA_EMBEDDING_MODEL") {
        config.embedding.model = model;
    }
    if let Some(base_url) = get("STRATA_EMBEDDING_BASE_URL") {
        config.embedding.base_url = base_url;
    }
    if let Some(secret) = get("STRATA_API_KEY") {
        config.auth.shared_secret = Some(secret);
    }
}

/// The configured database URL, or `{data_dir}/strata.db`.
pub fn resolve_database_url(config: &GlobalConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
