use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::ingestion::IngestionSettings;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docrelay server and CLI.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores chunk vectors.
    pub qdrant_url: String,
    /// Name of the Qdrant collection receiving document chunks.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime, when that provider is selected.
    pub ollama_url: Option<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Upper bound on chunk length, in characters.
    pub max_chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Directory receiving uploaded documents.
    pub upload_dir: PathBuf,
    /// Parent directory for per-page OCR scratch space.
    pub ocr_work_dir: Option<PathBuf>,
    /// Tesseract language list (`-l`), e.g. `vie+eng`.
    pub ocr_languages: String,
    /// Tesseract engine mode (`--oem`).
    pub ocr_engine_mode: u8,
    /// Tesseract page segmentation mode (`--psm`).
    pub ocr_page_segmentation_mode: u8,
    /// Wall-clock limit for each extraction subprocess.
    pub page_timeout_secs: u64,
    /// Fail documents that yield no chunks at all.
    pub require_extracted_content: bool,
    /// Maximum accepted multipart upload size in bytes.
    pub max_upload_bytes: usize,
    /// Default number of retrieval hits returned by search.
    pub search_default_limit: usize,
    /// Upper bound on retrieval hits a caller may request.
    pub search_max_limit: usize,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic in-process hashing embedder.
    Local,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_chunk_size = parse_or("MAX_CHUNK_SIZE", 1000)?;
        let chunk_overlap = parse_or("CHUNK_OVERLAP", 100)?;
        if max_chunk_size == 0 {
            return Err(ConfigError::InvalidValue("MAX_CHUNK_SIZE".into()));
        }
        if chunk_overlap >= max_chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }

        let embedding_dimension = parse_or("EMBEDDING_DIMENSION", 768)?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "documents".into()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env_optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Local),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".into()),
            embedding_dimension,
            ollama_url: load_env_optional("OLLAMA_URL"),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            max_chunk_size,
            chunk_overlap,
            upload_dir: load_env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            ocr_work_dir: load_env_optional("OCR_WORK_DIR").map(PathBuf::from),
            ocr_languages: load_env_optional("OCR_LANGUAGES").unwrap_or_else(|| "vie+eng".into()),
            ocr_engine_mode: parse_or("OCR_ENGINE_MODE", 1)?,
            ocr_page_segmentation_mode: parse_or("OCR_PAGE_SEGMENTATION_MODE", 3)?,
            page_timeout_secs: parse_or("PAGE_TIMEOUT_SECS", 120)?,
            require_extracted_content: parse_bool_or("REQUIRE_EXTRACTED_CONTENT", true)?,
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 10 << 20)?,
            search_default_limit: parse_or("SEARCH_DEFAULT_LIMIT", 5)?,
            search_max_limit: parse_or("SEARCH_MAX_LIMIT", 50)?,
        })
    }

    /// Snapshot the values the ingestion core needs into an immutable settings value.
    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            max_chunk_size: self.max_chunk_size,
            chunk_overlap: self.chunk_overlap,
            require_content: self.require_extracted_content,
            upload_dir: self.upload_dir.clone(),
            ocr_work_dir: self.ocr_work_dir.clone(),
            ocr_languages: self.ocr_languages.clone(),
            ocr_engine_mode: self.ocr_engine_mode,
            ocr_page_segmentation_mode: self.ocr_page_segmentation_mode,
            page_timeout: Duration::from_secs(self.page_timeout_secs.max(1)),
        }
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_bool_or(key: &str, default: bool) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        None => Ok(default),
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
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
        embedding_provider = ?config.embedding_provider,
        max_chunk_size = config.max_chunk_size,
        chunk_overlap = config.chunk_overlap,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
