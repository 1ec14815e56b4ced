//! Reranking pipeline with per-provider failure isolation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use retrieval_core::{
    Ranking, RerankDocument, RerankProvider, Reranker, RerankingConfig, RetrievalError,
    SearchResult,
};

use crate::http::{CrossEncoderReranker, HttpEndpointReranker};
use crate::llm::{LlmJudgeReranker, OpenAiChatModel};

/// Per-call overrides of the configured reranking defaults.
#[derive(Debug, Clone, Default)]
pub struct RerankOptions {
    /// Maximum reranked results.
    pub top_k: Option<usize>,

    /// Minimum reranked score.
    pub min_score: Option<f32>,

    /// Provider to use instead of the configured default.
    pub provider: Option<RerankProvider>,
}

/// Dispatches candidates to one reranking provider.
pub struct RerankingPipeline {
    enabled: bool,
    default_provider: RerankProvider,
    top_k: usize,
    min_score: f32,
    providers: HashMap<RerankProvider, Arc<dyn Reranker>>,
}

impl RerankingPipeline {
    /// Create a pipeline with no providers registered.
    pub fn new(config: &RerankingConfig) -> Self {
        Self {
            enabled: config.enabled,
            default_provider: config.default_provider,
            top_k: config.top_k,
            min_score: config.min_score,
            providers: HashMap::new(),
        }
    }

    /// Create a pipeline and register every provider that has credentials.
    ///
    /// Providers without an API key are left out and logged.
    pub fn from_config(config: &RerankingConfig) -> Self {
        let mut pipeline = Self::new(config);
        if !config.enabled {
            info!("Reranking disabled");
            return pipeline;
        }

        let timeout = Duration::from_secs(config.timeout_secs);

        match config.cross_encoder.resolved_api_key() {
            Some(key) => match CrossEncoderReranker::new(&config.cross_encoder, key, timeout) {
                Ok(r) => pipeline.register(RerankProvider::CrossEncoder, Arc::new(r)),
                Err(e) => warn!("Cross-encoder reranker unavailable: {}", e),
            },
            None => log_missing_key(RerankProvider::CrossEncoder),
        }

        match config.http_endpoint.resolved_api_key() {
            Some(key) => match HttpEndpointReranker::new(&config.http_endpoint, key, timeout) {
                Ok(r) => pipeline.register(RerankProvider::HttpEndpoint, Arc::new(r)),
                Err(e) => warn!("HTTP endpoint reranker unavailable: {}", e),
            },
            None => log_missing_key(RerankProvider::HttpEndpoint),
        }

        match config.llm_judge.resolved_api_key() {
            Some(key) => match OpenAiChatModel::new(&config.llm_judge, key, timeout) {
                Ok(model) => pipeline.register(
                    RerankProvider::LlmJudge,
                    Arc::new(LlmJudgeReranker::new(Arc::new(model), &config.llm_judge)),
                ),
                Err(e) => warn!("LLM judge reranker unavailable: {}", e),
            },
            None => log_missing_key(RerankProvider::LlmJudge),
        }

        info!("Initialized {} rerankers", pipeline.providers.len());
        pipeline
    }

    /// Register a provider implementation.
    pub fn with_provider(mut self, provider: RerankProvider, reranker: Arc<dyn Reranker>) -> Self {
        self.register(provider, reranker);
        self
    }

    fn register(&mut self, provider: RerankProvider, reranker: Arc<dyn Reranker>) {
        debug!("Registered {} reranker ({})", provider, reranker.name());
        self.providers.insert(provider, reranker);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_provider(&self) -> RerankProvider {
        self.default_provider
    }

    /// Registered providers, sorted by name.
    pub fn available_providers(&self) -> Vec<RerankProvider> {
        let mut providers: Vec<_> = self.providers.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    /// Rerank `results` for `query`.
    ///
    /// Never fails: when disabled, given nothing, missing the provider or the
    /// provider errors, the input comes back unchanged. A provider that
    /// answers without a usable ranking yields the input sorted by score and
    /// cut to `top_k`. Otherwise the reranked results scoring below
    /// `min_score` are dropped.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        options: &RerankOptions,
    ) -> Vec<SearchResult> {
        if !self.enabled || results.is_empty() {
            return results;
        }

        let top_k = options.top_k.unwrap_or(self.top_k);
        let min_score = options.min_score.unwrap_or(self.min_score);
        let provider = options.provider.unwrap_or(self.default_provider);

        let Some(reranker) = self.providers.get(&provider) else {
            warn!("Reranker {} not available, skipping reranking", provider);
            return results;
        };

        debug!("Reranking {} results with {}", results.len(), provider);

        let documents: Vec<RerankDocument> = results
            .iter()
            .enumerate()
            .map(|(index, r)| RerankDocument {
                index,
                text: r.content.clone(),
            })
            .collect();

        let scores = match reranker.score(query, &documents, top_k).await {
            Ok(Ranking::Scored(scores)) => scores,
            Ok(Ranking::KeepOriginal) => {
                info!("{} kept original order", provider);
                return keep_original(results, top_k);
            }
            Err(e) => {
                error!("{} reranking failed: {}", provider, e);
                return results;
            }
        };

        let reranked: Vec<SearchResult> = scores
            .iter()
            .filter_map(|s| {
                let mut result = results.get(s.index)?.clone();
                result
                    .metadata
                    .insert("pre_rerank_score".to_string(), result.score.into());
                result.score = s.relevance_score;
                Some(result)
            })
            .collect();

        if reranked.is_empty() {
            return results;
        }

        let before = reranked.len();
        let filtered: Vec<SearchResult> = reranked
            .into_iter()
            .filter(|r| r.score >= min_score)
            .collect();

        info!(
            "Post-reranking filtering: {} -> {} results (min_score={})",
            before,
            filtered.len(),
            min_score
        );
        filtered
    }
}

fn log_missing_key(provider: RerankProvider) {
    let err = RetrievalError::config(format!("no API key for {} reranker", provider));
    warn!("{}", err);
}

fn keep_original(mut results: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    results.truncate(top_k);
    results
}
