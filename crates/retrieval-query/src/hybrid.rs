//! Tiered hybrid search: store-side fusion, local RRF, dense-only.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, warn};

use retrieval_core::{
    DenseEmbedder, FusionQuery, NamedSparseVector, Prefetch, QueryVector, Result,
    RetrievalError, SearchResult, SparseEmbedder, SparseVector, VectorStore,
};

use crate::fusion::{reciprocal_rank_fusion, RrfParams};
use crate::schema::CollectionSchemaManager;

/// The search path that produced a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTier {
    /// One prefetch + fusion query answered by the store.
    NativeFusion,
    /// Separate dense and sparse queries fused locally.
    ManualFusion,
    /// Dense similarity only, scores normalized to [0, 1].
    DenseOnly,
}

impl SearchTier {
    pub fn is_hybrid(&self) -> bool {
        !matches!(self, SearchTier::DenseOnly)
    }
}

/// Results tagged with the tier that served them.
#[derive(Debug, Clone)]
pub struct TieredResults {
    pub tier: SearchTier,
    pub results: Vec<SearchResult>,
}

impl TieredResults {
    fn dense(results: Vec<SearchResult>) -> Self {
        Self {
            tier: SearchTier::DenseOnly,
            results,
        }
    }
}

/// Hybrid dense + sparse search over one collection.
///
/// Tiers are tried in order and each is attempted only when the previous
/// one failed. The dense-only tier is terminal: it logs failures and
/// returns an empty list.
pub struct HybridSearchEngine<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    sparse_embedder: Option<Arc<dyn SparseEmbedder>>,
    schema: Arc<CollectionSchemaManager<S>>,
    sparse_name: String,
    rrf: RrfParams,
}

impl<S, E> HybridSearchEngine<S, E>
where
    S: VectorStore,
    E: DenseEmbedder,
{
    pub fn new(
        store: Arc<S>,
        embedder: Arc<E>,
        sparse_embedder: Option<Arc<dyn SparseEmbedder>>,
        schema: Arc<CollectionSchemaManager<S>>,
        sparse_name: &str,
        rrf: RrfParams,
    ) -> Self {
        Self {
            store,
            embedder,
            sparse_embedder,
            schema,
            sparse_name: sparse_name.to_string(),
            rrf,
        }
    }

    pub fn rrf_params(&self) -> RrfParams {
        self.rrf
    }

    pub fn has_sparse_embedder(&self) -> bool {
        self.sparse_embedder.is_some()
    }

    fn collection(&self) -> &str {
        self.schema.collection()
    }

    /// Search one query, falling back through the tiers.
    pub async fn search(&self, query: &str, limit: usize, min_score: f32) -> TieredResults {
        let dense = match self.embedder.embed_query(query).await {
            Ok(dense) => dense,
            Err(e) => {
                error!("Failed to embed query: {}", e);
                return TieredResults::dense(Vec::new());
            }
        };

        let Some(sparse_embedder) = &self.sparse_embedder else {
            return TieredResults::dense(self.dense_search(&dense, limit).await);
        };
        if !self.schema.ensure_hybrid_compatible().await {
            return TieredResults::dense(self.dense_search(&dense, limit).await);
        }

        let sparse = match embed_sparse(sparse_embedder.as_ref(), query).await {
            Ok(sparse) => sparse,
            Err(e) => {
                warn!("Sparse embedding failed, using dense-only search: {}", e);
                return TieredResults::dense(self.dense_search(&dense, limit).await);
            }
        };

        match self.native_fusion(&dense, &sparse, limit, min_score).await {
            Ok(results) => {
                debug!("Native fusion returned {} results", results.len());
                return TieredResults {
                    tier: SearchTier::NativeFusion,
                    results,
                };
            }
            Err(e) => error!("Native fusion search failed: {}", e),
        }

        match self.manual_fusion(&dense, &sparse, limit, min_score).await {
            Ok(results) => {
                debug!("Manual RRF fusion returned {} results", results.len());
                TieredResults {
                    tier: SearchTier::ManualFusion,
                    results,
                }
            }
            Err(e) => {
                error!("Manual fusion search failed: {}", e);
                TieredResults::dense(self.dense_search(&dense, limit).await)
            }
        }
    }

    fn sparse_query(&self, sparse: &SparseVector) -> QueryVector {
        QueryVector::Sparse(NamedSparseVector {
            name: self.sparse_name.clone(),
            vector: sparse.clone(),
        })
    }

    async fn native_fusion(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>> {
        let prefetch_limit = limit.saturating_mul(2);
        let query = FusionQuery {
            prefetch: vec![
                Prefetch {
                    query: QueryVector::Dense(dense.to_vec()),
                    limit: prefetch_limit,
                },
                Prefetch {
                    query: self.sparse_query(sparse),
                    limit: prefetch_limit,
                },
            ],
            limit,
            score_threshold: Some(min_score),
        };

        let points = self.store.query_fused(self.collection(), &query).await?;
        Ok(points.into_iter().map(SearchResult::from).collect())
    }

    async fn manual_fusion(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>> {
        let prefetch_limit = limit.saturating_mul(2);
        let dense_query = QueryVector::Dense(dense.to_vec());
        let sparse_query = self.sparse_query(sparse);

        let (dense_hits, sparse_hits) = tokio::join!(
            self.store.search(self.collection(), &dense_query, prefetch_limit),
            self.store.search(self.collection(), &sparse_query, prefetch_limit)
        );
        let dense_hits: Vec<SearchResult> = dense_hits?.into_iter().map(Into::into).collect();
        let sparse_hits: Vec<SearchResult> = sparse_hits?.into_iter().map(Into::into).collect();

        debug!(
            "Dense search returned {} results, sparse search returned {} results",
            dense_hits.len(),
            sparse_hits.len()
        );

        let mut fused = reciprocal_rank_fusion(dense_hits, sparse_hits, limit, self.rrf);
        fused.retain(|r| r.score >= min_score);
        Ok(fused)
    }

    /// Dense-only search. Never fails; errors yield an empty list.
    pub async fn dense_search(&self, dense: &[f32], limit: usize) -> Vec<SearchResult> {
        match self.try_dense_search(dense, limit).await {
            Ok(results) => results,
            Err(e) => {
                error!("Dense search failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_dense_search(&self, dense: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let hits = self
            .store
            .search(
                self.collection(),
                &QueryVector::Dense(dense.to_vec()),
                limit.saturating_mul(3),
            )
            .await?;

        let mut seen = HashSet::new();
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|hit| seen.insert(content_hash(&hit.payload.content)))
            .map(|hit| {
                let mut result = SearchResult::from(hit);
                result.score = normalize_similarity(result.score);
                result
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }
}

async fn embed_sparse(embedder: &dyn SparseEmbedder, query: &str) -> Result<SparseVector> {
    embedder
        .embed(&[query])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RetrievalError::embedding("sparse embedder returned no vector"))
}

/// Map a cosine similarity in [-1, 1] to [0, 1].
pub fn normalize_similarity(score: f32) -> f32 {
    ((score + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Hash of the content with whitespace runs collapsed.
fn content_hash(content: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for (i, word) in content.split_whitespace().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(word.as_bytes());
    }
    hasher.finalize()
}
