//! TOML configuration with environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sibyl_gateway::{GatewayConfig, PoolConfig};
use sibyl_retrieval::{IndexerConfig, RewriteConfig, SearchConfig};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub chunking: ChunkingSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub rewrite: RewriteSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewaySection {
    /// API keys for the pool. Usually left empty in the file and supplied
    /// through `SIBYL_API_KEYS`.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_key: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_penalty_base")]
    pub penalty_base: u32,
    #[serde(default = "default_cooldown_per_penalty_ms")]
    pub cooldown_per_penalty_ms: u64,
    #[serde(default = "default_cooldown_cap_ms")]
    pub cooldown_cap_ms: u64,
    #[serde(default = "default_safety_cooldown_ms")]
    pub safety_cooldown_ms: u64,
    #[serde(default = "default_fatal_cooldown_ms")]
    pub fatal_cooldown_ms: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageSection {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Qdrant endpoint; `None` runs the in-memory vector index.
    #[serde(default)]
    pub qdrant_url: Option<String>,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChunkingSection {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchSection {
    #[serde(default = "default_k_vector")]
    pub k_vector: u32,
    #[serde(default = "default_k_fts")]
    pub k_fts: u32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    #[serde(default = "default_max_parent_docs")]
    pub max_parent_docs: usize,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RewriteSection {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_generation_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_embedding_model() -> String {
    "text-embedding-004".into()
}
fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_attempt_timeout_ms() -> u64 {
    30_000
}
fn default_acquire_timeout_ms() -> u64 {
    60_000
}
fn default_penalty_base() -> u32 {
    1
}
fn default_cooldown_per_penalty_ms() -> u64 {
    2_000
}
fn default_cooldown_cap_ms() -> u64 {
    60_000
}
fn default_safety_cooldown_ms() -> u64 {
    5_000
}
fn default_fatal_cooldown_ms() -> u64 {
    3_600_000
}
fn default_sqlite_path() -> String {
    "sibyl.db".into()
}
fn default_vector_dim() -> u64 {
    768
}
fn default_max_chars() -> usize {
    1000
}
fn default_concurrency_limit() -> usize {
    4
}
fn default_k_vector() -> u32 {
    20
}
fn default_k_fts() -> u32 {
    20
}
fn default_rrf_k() -> u32 {
    60
}
fn default_final_k() -> usize {
    12
}
fn default_max_parent_docs() -> usize {
    4
}
fn default_history_window() -> usize {
    6
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: default_base_url(),
            generation_model: default_generation_model(),
            embedding_model: default_embedding_model(),
            max_attempts_per_key: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            penalty_base: default_penalty_base(),
            cooldown_per_penalty_ms: default_cooldown_per_penalty_ms(),
            cooldown_cap_ms: default_cooldown_cap_ms(),
            safety_cooldown_ms: default_safety_cooldown_ms(),
            fatal_cooldown_ms: default_fatal_cooldown_ms(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            qdrant_url: None,
            vector_dim: default_vector_dim(),
        }
    }
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            k_vector: default_k_vector(),
            k_fts: default_k_fts(),
            rrf_k: default_rrf_k(),
            final_k: default_final_k(),
            max_parent_docs: default_max_parent_docs(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

impl Default for RewriteSection {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIBYL_API_KEYS") {
            self.gateway.api_keys = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Ok(v) = std::env::var("SIBYL_BASE_URL") {
            self.gateway.base_url = v;
        }
        if let Ok(v) = std::env::var("SIBYL_GENERATION_MODEL") {
            self.gateway.generation_model = v;
        }
        if let Ok(v) = std::env::var("SIBYL_EMBEDDING_MODEL") {
            self.gateway.embedding_model = v;
        }
        if let Ok(v) = std::env::var("SIBYL_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("SIBYL_QDRANT_URL") {
            self.storage.qdrant_url = Some(v);
        }
        if let Ok(v) = std::env::var("SIBYL_VECTOR_DIM")
            && let Ok(dim) = v.parse::<u64>()
        {
            self.storage.vector_dim = dim;
        }
    }

    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            generation_model: self.gateway.generation_model.clone(),
            embedding_model: self.gateway.embedding_model.clone(),
            max_attempts_per_key: self.gateway.max_attempts_per_key,
            retry_delay: Duration::from_millis(self.gateway.retry_delay_ms),
            attempt_timeout: Duration::from_millis(self.gateway.attempt_timeout_ms),
            acquire_timeout: Duration::from_millis(self.gateway.acquire_timeout_ms),
        }
    }

    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            penalty_base: self.gateway.penalty_base,
            cooldown_per_penalty: Duration::from_millis(self.gateway.cooldown_per_penalty_ms),
            cooldown_cap: Duration::from_millis(self.gateway.cooldown_cap_ms),
            safety_cooldown: Duration::from_millis(self.gateway.safety_cooldown_ms),
            fatal_cooldown: Duration::from_millis(self.gateway.fatal_cooldown_ms),
        }
    }

    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            max_chars: self.chunking.max_chars,
            concurrency_limit: self.chunking.concurrency_limit,
            vector_dim: self.storage.vector_dim,
        }
    }

    #[must_use]
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            k_vector: self.search.k_vector,
            k_fts: self.search.k_fts,
            rrf_k: self.search.rrf_k,
            final_k: self.search.final_k,
            max_parent_docs: self.search.max_parent_docs,
            concurrency_limit: self.search.concurrency_limit,
        }
    }

    #[must_use]
    pub fn rewrite_config(&self) -> RewriteConfig {
        RewriteConfig {
            history_window: self.rewrite.history_window,
        }
    }
}
