//! Environment-driven settings for the server process.
//!
//! Every setting has a default suitable for local development, so a bare
//! `cargo run` works against a Docker Qdrant on the same machine. `.env` files
//! are honoured through `dotenvy`.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while reading settings from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set to something the expected type cannot parse.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Name of the offending environment variable.
        key: String,
        /// The raw value that failed to parse.
        value: String,
    },
}

/// Runtime configuration for the Paperquery server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Qdrant endpoint holding the chunk vectors.
    pub qdrant_url: String,
    /// Collection the chunks live in.
    pub qdrant_collection_name: String,
    /// API key sent to Qdrant when set.
    pub qdrant_api_key: Option<String>,
    /// Which backend turns text into vectors.
    pub embedding_provider: EmbeddingProvider,
    /// Model identifier passed to the embedding backend.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// OpenAI-compatible chat completion endpoint used for answer synthesis.
    pub llm_base_url: String,
    /// Bearer token for the chat endpoint when it requires one.
    pub llm_api_key: Option<String>,
    /// Chat model used for answer synthesis.
    pub llm_model: String,
    /// Location of the SQLite metadata database.
    pub database_path: PathBuf,
    /// Directory holding one tabular SQLite database per user.
    pub tabular_dir: PathBuf,
    /// Directory where uploaded files are stored.
    pub upload_dir: PathBuf,
    /// Fixed HTTP port; when unset the server scans for a free one.
    pub server_port: Option<u16>,
    /// Lifetime of issued session tokens, in minutes.
    pub session_ttl_minutes: i64,
    /// Passages retrieved per semantic query unless the request overrides it.
    pub search_default_limit: usize,
    /// Upper bound on the per-query passage count.
    pub search_max_limit: usize,
    /// Minimum similarity score for retrieved passages, when set.
    pub search_score_threshold: Option<f32>,
    /// Explicit chunk token budget, overriding the automatic choice.
    pub text_splitter_chunk_size: Option<usize>,
    /// Token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: Option<usize>,
    /// Derive smaller automatic chunk sizes for retrieval precision.
    pub text_splitter_use_safe_defaults: bool,
    /// Maximum number of per-row documents indexed per spreadsheet.
    pub tabular_row_document_limit: usize,
}

/// Supported embedding backends for the ingestion pipeline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic offline embedder, useful without any provider running.
    Hashing,
}

impl EmbeddingProvider {
    /// Lowercase provider name, as accepted by `EMBEDDING_PROVIDER`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAI => "openai",
            Self::Hashing => "hashing",
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// development defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: env_string("QDRANT_URL", "http://127.0.0.1:6333"),
            qdrant_collection_name: env_string("QDRANT_COLLECTION_NAME", "documents"),
            qdrant_api_key: env_optional("QDRANT_API_KEY"),
            embedding_provider: env_parse("EMBEDDING_PROVIDER", EmbeddingProvider::Ollama)?,
            embedding_model: env_string("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", 768)?,
            ollama_url: env_string("OLLAMA_URL", "http://127.0.0.1:11434"),
            llm_base_url: env_string("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: env_optional("LLM_API_KEY"),
            llm_model: env_string("LLM_MODEL", "gpt-4o-mini"),
            database_path: PathBuf::from(env_string("DATABASE_PATH", "data/metadata.db")),
            tabular_dir: PathBuf::from(env_string("TABULAR_DIR", "data/tables")),
            upload_dir: PathBuf::from(env_string("UPLOAD_DIR", "data/uploads")),
            server_port: env_parse_optional("SERVER_PORT")?,
            session_ttl_minutes: env_parse("SESSION_TTL_MINUTES", 1440)?,
            search_default_limit: env_parse("SEARCH_DEFAULT_LIMIT", 5)?,
            search_max_limit: env_parse("SEARCH_MAX_LIMIT", 20)?,
            search_score_threshold: env_parse_optional("SEARCH_SCORE_THRESHOLD")?,
            text_splitter_chunk_size: env_parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: env_parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?,
            text_splitter_use_safe_defaults: env_parse("TEXT_SPLITTER_USE_SAFE_DEFAULTS", true)?,
            tabular_row_document_limit: env_parse("TABULAR_ROW_DOCUMENT_LIMIT", 500)?,
        })
    }
}

/// Read a variable, treating unset and blank values the same way.
fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env_optional(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn env_parse_optional<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    env_optional(key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        server_port = ?config.server_port,
        embedding_provider = config.embedding_provider.as_str(),
        llm_model = %config.llm_model,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
