//! Configuration types for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the retrieval engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Vector store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search defaults.
    #[serde(default)]
    pub search: SearchConfig,

    /// Hybrid dense + sparse fusion.
    #[serde(default)]
    pub hybrid: HybridConfig,

    /// Multi-query expansion consumption.
    #[serde(default)]
    pub multi_query: MultiQueryConfig,

    /// Reranking pipeline.
    #[serde(default)]
    pub reranking: RerankingConfig,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Collection the engine reads and writes.
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Points per upsert batch during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Points per scroll page while copying a collection into its backup.
    #[serde(default = "default_migration_page_size")]
    pub migration_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection_name: default_collection_name(),
            batch_size: 100,
            migration_page_size: 256,
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Dense vector dimensionality.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Generate sparse vectors (enables hybrid mode).
    #[serde(default = "default_true")]
    pub sparse_enabled: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            sparse_enabled: true,
        }
    }
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Default minimum score.
    #[serde(default = "default_min_score")]
    pub default_min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            default_min_score: 0.5,
        }
    }
}

/// Hybrid search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// RRF weight of the dense list.
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,

    /// RRF weight of the sparse list.
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f32,

    /// RRF constant k.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Name of the sparse vector field.
    #[serde(default = "default_sparse_vector_name")]
    pub sparse_vector_name: String,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.6,
            sparse_weight: 0.4,
            rrf_k: 60,
            sparse_vector_name: default_sparse_vector_name(),
        }
    }
}

/// Multi-query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiQueryConfig {
    /// Search expanded queries alongside the original.
    #[serde(default)]
    pub enable_query_expansion: bool,

    /// Maximum expanded queries searched in addition to the original.
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Bonus per distinct source query in multi-query fusion.
    #[serde(default = "default_diversity_bonus")]
    pub diversity_bonus: f32,
}

impl Default for MultiQueryConfig {
    fn default() -> Self {
        Self {
            enable_query_expansion: false,
            max_expansions: 3,
            diversity_bonus: 0.05,
        }
    }
}

/// Reranking provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankProvider {
    /// Batch cross-encoder API.
    #[serde(alias = "cohere")]
    CrossEncoder,

    /// Plain HTTP reranking endpoint.
    #[serde(alias = "jina")]
    HttpEndpoint,

    /// Chat model used as a relevance judge.
    #[serde(alias = "llm", alias = "gpt5_nano")]
    LlmJudge,
}

impl RerankProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossEncoder => "cross_encoder",
            Self::HttpEndpoint => "http_endpoint",
            Self::LlmJudge => "llm_judge",
        }
    }
}

impl std::fmt::Display for RerankProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RerankProvider {
    type Err = crate::error::RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cross_encoder" | "cross-encoder" | "cohere" => Ok(Self::CrossEncoder),
            "http_endpoint" | "http-endpoint" | "jina" => Ok(Self::HttpEndpoint),
            "llm_judge" | "llm-judge" | "llm" | "gpt5_nano" => Ok(Self::LlmJudge),
            other => Err(crate::error::RetrievalError::config(format!(
                "Unknown rerank provider: {}",
                other
            ))),
        }
    }
}

/// Reranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankingConfig {
    /// Enable the reranking pipeline.
    #[serde(default)]
    pub enabled: bool,

    /// Provider used when the caller does not name one.
    #[serde(default = "default_provider")]
    pub default_provider: RerankProvider,

    /// Default number of reranked results.
    #[serde(default = "default_rerank_top_k")]
    pub top_k: usize,

    /// Default minimum reranked score.
    #[serde(default = "default_rerank_min_score")]
    pub min_score: f32,

    /// HTTP timeout for provider calls in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub cross_encoder: CrossEncoderConfig,

    #[serde(default)]
    pub http_endpoint: HttpEndpointConfig,

    #[serde(default)]
    pub llm_judge: LlmJudgeConfig,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_provider: RerankProvider::CrossEncoder,
            top_k: 5,
            min_score: 0.4,
            timeout_secs: 30,
            cross_encoder: CrossEncoderConfig::default(),
            http_endpoint: HttpEndpointConfig::default(),
            llm_judge: LlmJudgeConfig::default(),
        }
    }
}

/// Batch cross-encoder API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossEncoderConfig {
    /// API key (falls back to `COHERE_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_cross_encoder_model")]
    pub model: String,

    #[serde(default = "default_cross_encoder_endpoint")]
    pub endpoint: String,
}

impl Default for CrossEncoderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_cross_encoder_model(),
            endpoint: default_cross_encoder_endpoint(),
        }
    }
}

impl CrossEncoderConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key, "COHERE_API_KEY")
    }
}

/// HTTP reranking endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpointConfig {
    /// API key (falls back to `JINA_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_http_model")]
    pub model: String,

    #[serde(default = "default_http_endpoint")]
    pub endpoint: String,
}

impl Default for HttpEndpointConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_http_model(),
            endpoint: default_http_endpoint(),
        }
    }
}

impl HttpEndpointConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key, "JINA_API_KEY")
    }
}

/// LLM judge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmJudgeConfig {
    /// API key (falls back to `OPENAI_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Chat completions endpoint.
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Maximum candidates shown to the judge.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Characters of each candidate shown to the judge.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
}

impl Default for LlmJudgeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_llm_model(),
            endpoint: default_llm_endpoint(),
            max_candidates: 12,
            preview_chars: 300,
            max_completion_tokens: 800,
        }
    }
}

impl LlmJudgeConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(&self.api_key, "OPENAI_API_KEY")
    }
}

fn resolve_key(configured: &Option<String>, env_var: &str) -> Option<String> {
    configured
        .clone()
        .filter(|key| !key.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok())
        .filter(|key| !key.trim().is_empty())
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_collection_name() -> String {
    "documents".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_migration_page_size() -> usize {
    256
}

fn default_dimension() -> usize {
    384
}

fn default_limit() -> usize {
    20
}

fn default_min_score() -> f32 {
    0.5
}

fn default_dense_weight() -> f32 {
    0.6
}

fn default_sparse_weight() -> f32 {
    0.4
}

fn default_rrf_k() -> u32 {
    60
}

fn default_sparse_vector_name() -> String {
    "keywords".to_string()
}

fn default_max_expansions() -> usize {
    3
}

fn default_diversity_bonus() -> f32 {
    0.05
}

fn default_provider() -> RerankProvider {
    RerankProvider::CrossEncoder
}

fn default_rerank_top_k() -> usize {
    5
}

fn default_rerank_min_score() -> f32 {
    0.4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cross_encoder_model() -> String {
    "rerank-multilingual-v2.0".to_string()
}

fn default_cross_encoder_endpoint() -> String {
    "https://api.cohere.ai/v1/rerank".to_string()
}

fn default_http_model() -> String {
    "jina-reranker-v1-base-en".to_string()
}

fn default_http_endpoint() -> String {
    "https://api.jina.ai/v1/rerank".to_string()
}

fn default_llm_model() -> String {
    "gpt-5-nano".to_string()
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_max_candidates() -> usize {
    12
}

fn default_preview_chars() -> usize {
    300
}

fn default_max_completion_tokens() -> u32 {
    800
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retrieval")
        .join("vectors.db")
}

impl RetrievalConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::RetrievalError::config(format!("Failed to parse config: {}", e))
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> crate::error::Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("retrieval").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("retrieval.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetrievalConfig::default();
        assert_eq!(config.store.collection_name, "documents");
        assert_eq!(config.search.default_limit, 20);
        assert_eq!(config.hybrid.rrf_k, 60);
        assert_eq!(config.hybrid.sparse_vector_name, "keywords");
        assert_eq!(config.multi_query.max_expansions, 3);
        assert!(!config.reranking.enabled);
        assert_eq!(config.reranking.llm_judge.max_candidates, 12);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RetrievalConfig = toml::from_str(
            r#"
            [hybrid]
            dense_weight = 0.7

            [reranking]
            enabled = true
            default_provider = "jina"

            [reranking.llm_judge]
            preview_chars = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.hybrid.dense_weight, 0.7);
        assert_eq!(config.hybrid.sparse_weight, 0.4);
        assert!(config.reranking.enabled);
        assert_eq!(config.reranking.default_provider, RerankProvider::HttpEndpoint);
        assert_eq!(config.reranking.llm_judge.preview_chars, 120);
        assert_eq!(config.reranking.llm_judge.model, "gpt-5-nano");
        assert_eq!(config.store.batch_size, 100);
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(
            "cohere".parse::<RerankProvider>().unwrap(),
            RerankProvider::CrossEncoder
        );
        assert_eq!(
            "llm_judge".parse::<RerankProvider>().unwrap(),
            RerankProvider::LlmJudge
        );
        assert!("bm25".parse::<RerankProvider>().is_err());
        assert_eq!(RerankProvider::HttpEndpoint.to_string(), "http_endpoint");
    }

    #[test]
    fn test_configured_key_wins() {
        let config = CrossEncoderConfig {
            api_key: Some("configured".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_api_key().as_deref(), Some("configured"));
    }

    #[test]
    fn test_blank_key_is_missing() {
        let config = HttpEndpointConfig {
            api_key: Some("  ".to_string()),
            ..Default::default()
        };
        // Blank configured key falls through to the environment.
        assert_eq!(
            config.resolved_api_key(),
            std::env::var("JINA_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
        );
    }
}
