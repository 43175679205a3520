//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults that
//! run fully offline (SQLite vectors and graph, embeddings disabled).
//!
//! ```toml
//! [db]
//! path = "./data/cvprd.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "openai/text-embedding-3-small"
//!
//! [vector]
//! backend = "qdrant"
//! url = "http://localhost:6333"
//!
//! [graph]
//! backend = "neo4j"
//! url = "http://localhost:7474"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ollama server URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Base URL of an OpenAI-compatible API (OpenRouter by default).
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            base_url: default_openai_base_url(),
            api_key_env: default_embedding_key_env(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `sqlite` or `qdrant`.
    #[serde(default = "default_sqlite_backend")]
    pub backend: String,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Environment variable holding a Qdrant API key, if the server needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite_backend(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key_env: None,
        }
    }
}

fn default_sqlite_backend() -> String {
    "sqlite".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "prd_chunks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// `sqlite`, `neo4j`, or `disabled`.
    #[serde(default = "default_sqlite_backend")]
    pub backend: String,
    #[serde(default = "default_neo4j_url")]
    pub url: String,
    #[serde(default = "default_neo4j_database")]
    pub database: String,
    #[serde(default = "default_neo4j_user")]
    pub user: String,
    #[serde(default = "default_neo4j_password_env")]
    pub password_env: String,
    /// Upper bound for traversal depth requested through the API.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite_backend(),
            url: default_neo4j_url(),
            database: default_neo4j_database(),
            user: default_neo4j_user(),
            password_env: default_neo4j_password_env(),
            max_depth: default_max_depth(),
        }
    }
}

impl GraphConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }
}

fn default_neo4j_url() -> String {
    "http://localhost:7474".to_string()
}
fn default_neo4j_database() -> String {
    "neo4j".to_string()
}
fn default_neo4j_user() -> String {
    "neo4j".to_string()
}
fn default_neo4j_password_env() -> String {
    "NEO4J_PASSWORD".to_string()
}
fn default_max_depth() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_limit")]
    pub default_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            default_limit: default_limit(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_llm_model(),
            api_key_env: default_embedding_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

fn default_llm_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Defaults rooted at `./data/cvprd.sqlite`, used when no config file exists.
    pub fn minimal() -> Self {
        Self::with_db_path(PathBuf::from("./data/cvprd.sqlite"))
    }

    /// Defaults with the given database path.
    pub fn with_db_path(path: PathBuf) -> Self {
        Self {
            db: DbConfig { path },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector: VectorConfig::default(),
            graph: GraphConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Checks value ranges and backend names.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be > 0");
        }

        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }

        if self.retrieval.default_limit < 1 {
            anyhow::bail!("retrieval.default_limit must be >= 1");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            "hash" => {
                if self.embedding.dims == Some(0) {
                    anyhow::bail!("embedding.dims must be > 0");
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hash, or local.",
                other
            ),
        }

        match self.vector.backend.as_str() {
            "sqlite" | "qdrant" => {}
            other => anyhow::bail!(
                "Unknown vector backend: '{}'. Must be sqlite or qdrant.",
                other
            ),
        }

        match self.graph.backend.as_str() {
            "sqlite" | "neo4j" | "disabled" => {}
            other => anyhow::bail!(
                "Unknown graph backend: '{}'. Must be sqlite, neo4j, or disabled.",
                other
            ),
        }

        if self.graph.max_depth == 0 {
            anyhow::bail!("graph.max_depth must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
