/// Configuration module for VectorMind.
///
/// Handles loading, validating, and providing default configuration values.
/// Secrets may come from the environment so the JSON file can be committed.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const EMBEDDING_API_KEY_ENV: &str = "EMBEDDING_API_KEY";
pub const VECTOR_STORE_API_KEY_ENV: &str = "VECTOR_STORE_API_KEY";

// ── Default value functions ──────────────────────────────────────────

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "md", "markdown", "csv", "json", "jsonl", "pdf", "docx", "xlsx", "html", "htm",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_search_limit() -> usize {
    5
}

fn default_threshold() -> f32 {
    0.7
}

fn default_api_url() -> String {
    "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_model_name() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "./vectormind.db".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Maximum accepted file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Lowercase extensions without the leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Http,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between successful batches.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Backoff unit: attempt `n` waits `retry_base_ms * 2^n`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub wait_for_model: bool,

    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Sqlite,
    Remote,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub backend: VectorBackend,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the index holding document chunks (remote backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_url: Option<String>,

    /// Base URL of the index holding memory entries (remote backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_url: Option<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            threshold: default_threshold(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model_name(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            batch_delay_ms: default_batch_delay_ms(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            wait_for_model: default_true(),
            use_cache: default_true(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            db_path: default_db_path(),
            api_key: None,
            documents_url: None,
            memory_url: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`. A missing file
    /// yields the defaults; a malformed one is an error.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        let mut cfg = if Path::new(path).exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;
            let cfg: Config = serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON in config: {path}"))?;
            info!("Loaded configuration from {path}");
            cfg
        } else {
            info!("{path} not found, using defaults");
            Self::default()
        };

        cfg.apply_env();
        Ok(cfg)
    }

    /// Fill empty credentials from the environment.
    pub fn apply_env(&mut self) {
        if is_blank(self.embedding.api_key.as_deref()) {
            if let Ok(key) = std::env::var(EMBEDDING_API_KEY_ENV) {
                self.embedding.api_key = Some(key);
            }
        }
        if is_blank(self.vector_store.api_key.as_deref()) {
            if let Ok(key) = std::env::var(VECTOR_STORE_API_KEY_ENV) {
                self.vector_store.api_key = Some(key);
            }
        }
    }

    /// Validate configuration values. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        let ingest = &self.ingest;
        anyhow::ensure!(ingest.chunk_size > 0, "ingest.chunk_size must be positive");
        anyhow::ensure!(
            ingest.chunk_overlap < ingest.chunk_size,
            "ingest.chunk_overlap must be smaller than ingest.chunk_size"
        );
        anyhow::ensure!(
            ingest.max_file_size > 0,
            "ingest.max_file_size must be positive"
        );
        anyhow::ensure!(
            !ingest.allowed_extensions.is_empty(),
            "at least one allowed extension must be specified"
        );

        anyhow::ensure!(self.search.limit > 0, "search.limit must be positive");
        anyhow::ensure!(
            (-1.0..=1.0).contains(&self.search.threshold),
            "search.threshold must be within [-1, 1]"
        );

        let embedding = &self.embedding;
        anyhow::ensure!(
            embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            embedding.batch_size > 0,
            "embedding.batch_size must be positive"
        );
        if embedding.provider == EmbeddingProviderKind::Http {
            anyhow::ensure!(
                !embedding.api_url.trim().is_empty(),
                "embedding.api_url is required for the http provider"
            );
            anyhow::ensure!(
                !is_blank(embedding.api_key.as_deref()),
                "embedding.api_key (or {EMBEDDING_API_KEY_ENV}) is required for the http provider"
            );
        }

        let store = &self.vector_store;
        match store.backend {
            VectorBackend::Sqlite => {
                anyhow::ensure!(
                    !store.db_path.trim().is_empty(),
                    "vector_store.db_path is required for the sqlite backend"
                );
            }
            VectorBackend::Remote => {
                anyhow::ensure!(
                    !is_blank(store.api_key.as_deref()),
                    "vector_store.api_key (or {VECTOR_STORE_API_KEY_ENV}) is required for the remote backend"
                );
                anyhow::ensure!(
                    !is_blank(store.documents_url.as_deref()),
                    "vector_store.documents_url is required for the remote backend"
                );
                anyhow::ensure!(
                    !is_blank(store.memory_url.as_deref()),
                    "vector_store.memory_url is required for the remote backend"
                );
            }
        }

        if embedding.provider == EmbeddingProviderKind::Mock {
            warn!("Using the mock embedding provider; search quality is meaningless");
        }

        Ok(())
    }

    /// Whether `ext` (without dot, any case) is in the allow-list.
    #[must_use]
    pub fn is_extension_allowed(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.ingest
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> Config {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProviderKind::Mock;
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ingest.chunk_size, 1000);
        assert_eq!(config.ingest.chunk_overlap, 200);
        assert_eq!(config.ingest.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.search.limit, 5);
        assert!((config.search.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.embedding.batch_size, 10);
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.vector_store.backend, VectorBackend::Sqlite);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"ingest": {"chunk_size": 500}, "embedding": {"provider": "mock"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.ingest.chunk_size, 500);
        assert_eq!(config.ingest.chunk_overlap, 200);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Mock);
        assert_eq!(config.search.limit, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.ingest.chunk_size, 1000);
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_validate_ok() {
        assert!(mock_config().validate().is_ok());
    }

    #[test]
    fn test_validate_http_requires_key() {
        let mut config = Config::default();
        config.embedding.api_key = None;
        assert!(config.validate().is_err());

        config.embedding.api_key = Some("hf_test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_overlap_smaller_than_chunk() {
        let mut config = mock_config();
        config.ingest.chunk_overlap = config.ingest.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_threshold_range() {
        let mut config = mock_config();
        config.search.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_remote_backend_needs_urls() {
        let mut config = mock_config();
        config.vector_store.backend = VectorBackend::Remote;
        config.vector_store.api_key = Some("pc_test".to_string());
        assert!(config.validate().is_err());

        config.vector_store.documents_url = Some("https://docs.example.io".to_string());
        config.vector_store.memory_url = Some("https://memory.example.io".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extension_allow_list_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_extension_allowed("md"));
        assert!(config.is_extension_allowed("PDF"));
        assert!(!config.is_extension_allowed("exe"));
    }

    #[test]
    fn test_serialized_defaults_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::default();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let parsed = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(parsed.ingest.chunk_size, config.ingest.chunk_size);
        assert_eq!(parsed.embedding.model, config.embedding.model);
        assert_eq!(parsed.vector_store.db_path, config.vector_store.db_path);
    }
}
