//! Retrieval orchestrator: the public search, rerank and indexing surface.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use retrieval_core::{
    ChunkInput, CollectionDetails, CollectionSchema, DenseEmbedder, Distance, DocumentPage,
    DocumentSummary, EmbeddedChunk, MetadataBackup, MetadataFilter, NamedSparseVector, Payload,
    Point, QueryExpander, Result, RetrievalConfig, RetrievalError, RetrievalStats, ScrollRequest,
    SearchResult, SparseEmbedder, SparseVector, VectorStore,
};
use retrieval_rerank::{RerankOptions, RerankingPipeline};

use crate::fusion::{fuse_multi_query, RrfParams, SubqueryResults};
use crate::hybrid::HybridSearchEngine;
use crate::quality::{preprocess_query, ResultQualityValidator};
use crate::schema::{unix_secs, CollectionSchemaManager};
use crate::stats::SearchCounters;

/// Page size used when walking a whole collection or document.
const SCROLL_PAGE: usize = 1000;

/// Per-call overrides of the configured search defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub limit: Option<usize>,

    /// Minimum score of returned results.
    pub min_score: Option<f32>,
}

/// Assembles a [`RetrievalOrchestrator`].
pub struct OrchestratorBuilder<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: RetrievalConfig,
    sparse_embedder: Option<Arc<dyn SparseEmbedder>>,
    expander: Option<Arc<dyn QueryExpander>>,
    reranker: Option<RerankingPipeline>,
}

impl<S, E> OrchestratorBuilder<S, E>
where
    S: VectorStore,
    E: DenseEmbedder,
{
    /// Enable hybrid search with this sparse embedder.
    pub fn sparse_embedder(mut self, embedder: Arc<dyn SparseEmbedder>) -> Self {
        self.sparse_embedder = Some(embedder);
        self
    }

    /// Search expanded queries produced by this engine.
    pub fn query_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Use this pipeline instead of one built from the configuration.
    pub fn reranking(mut self, pipeline: RerankingPipeline) -> Self {
        self.reranker = Some(pipeline);
        self
    }

    pub fn build(self) -> RetrievalOrchestrator<S, E> {
        let config = self.config;
        let sparse_embedder = self
            .sparse_embedder
            .filter(|_| config.embedding.sparse_enabled);

        let dimension = self.embedder.dimension();
        let target = match sparse_embedder {
            Some(_) => {
                CollectionSchema::hybrid(dimension, Distance::Cosine, &config.hybrid.sparse_vector_name)
            }
            None => CollectionSchema::dense_only(dimension, Distance::Cosine),
        };

        let schema = Arc::new(CollectionSchemaManager::new(
            self.store.clone(),
            &config.store.collection_name,
            target,
            config.store.migration_page_size,
        ));
        let hybrid = HybridSearchEngine::new(
            self.store.clone(),
            self.embedder.clone(),
            sparse_embedder.clone(),
            schema.clone(),
            &config.hybrid.sparse_vector_name,
            RrfParams::from(&config.hybrid),
        );
        let reranker = self
            .reranker
            .unwrap_or_else(|| RerankingPipeline::from_config(&config.reranking));

        RetrievalOrchestrator {
            store: self.store,
            embedder: self.embedder,
            sparse_embedder,
            expander: self.expander,
            schema,
            hybrid,
            validator: ResultQualityValidator::default(),
            reranker,
            counters: SearchCounters::default(),
            config,
        }
    }
}

/// Hybrid retrieval engine over one collection.
///
/// `search` preprocesses the query, optionally expands it, runs every query
/// through the tiered [`HybridSearchEngine`], fuses multi-query results,
/// validates them lexically and applies the final score gate.
pub struct RetrievalOrchestrator<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    sparse_embedder: Option<Arc<dyn SparseEmbedder>>,
    expander: Option<Arc<dyn QueryExpander>>,
    schema: Arc<CollectionSchemaManager<S>>,
    hybrid: HybridSearchEngine<S, E>,
    validator: ResultQualityValidator,
    reranker: RerankingPipeline,
    counters: SearchCounters,
    config: RetrievalConfig,
}

impl<S, E> RetrievalOrchestrator<S, E>
where
    S: VectorStore,
    E: DenseEmbedder,
{
    pub fn builder(store: Arc<S>, embedder: Arc<E>, config: RetrievalConfig) -> OrchestratorBuilder<S, E> {
        OrchestratorBuilder {
            store,
            embedder,
            config,
            sparse_embedder: None,
            expander: None,
            reranker: None,
        }
    }

    fn collection(&self) -> &str {
        &self.config.store.collection_name
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Verify the store is reachable and create the collection if missing.
    ///
    /// Existing dense-only collections are migrated lazily by the first
    /// search or ingest.
    pub async fn initialize(&self) -> Result<()> {
        let collections = self
            .store
            .list_collections()
            .await
            .map_err(|e| RetrievalError::store(format!("vector store unavailable: {e}")))?;

        if collections.iter().any(|c| c.name == self.collection()) {
            info!("Using existing collection '{}'", self.collection());
            return Ok(());
        }

        let schema = self.schema.target_schema();
        self.store.create_collection(self.collection(), schema).await?;
        info!(
            "Created collection '{}' ({:?}, dim {})",
            self.collection(),
            schema.state(),
            schema.dense.size
        );
        Ok(())
    }

    /// Check the collection schema and migrate it to hybrid if needed.
    ///
    /// Returns whether hybrid search is enabled.
    pub async fn ensure_hybrid_compatible(&self) -> bool {
        self.schema.ensure_hybrid_compatible().await
    }

    pub fn migration_count(&self) -> u64 {
        self.schema.migration_count()
    }

    /// Search the collection. Never fails; exhausted fallbacks give an
    /// empty list.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Vec<SearchResult> {
        let start = Instant::now();
        let limit = options.limit.unwrap_or(self.config.search.default_limit);
        let min_score = options
            .min_score
            .unwrap_or(self.config.search.default_min_score);

        self.counters.record_search();
        let processed = preprocess_query(query);
        info!("Searching for: {:?}", processed);

        let queries = self.queries_for(&processed).await;
        let subqueries = join_all(queries.into_iter().map(|query| async move {
            let tiered = self.hybrid.search(&query, limit, min_score).await;
            self.counters.record_tier(tiered.tier);
            debug!(
                "Query {:?} served by {:?}: {} results",
                query,
                tiered.tier,
                tiered.results.len()
            );
            SubqueryResults {
                query,
                results: tiered.results,
            }
        }))
        .await;

        let merged = if subqueries.len() > 1 {
            fuse_multi_query(&subqueries, self.config.multi_query.diversity_bonus)
        } else {
            subqueries
                .into_iter()
                .next()
                .map(|s| s.results)
                .unwrap_or_default()
        };

        let mut results = self.validator.validate(&processed, merged);
        results.retain(|r| r.score >= min_score);
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        info!(
            "Search returned {} results in {:?}",
            results.len(),
            start.elapsed()
        );
        results
    }

    async fn queries_for(&self, processed: &str) -> Vec<String> {
        let mut queries = vec![processed.to_string()];
        if !self.config.multi_query.enable_query_expansion {
            return queries;
        }
        let Some(expander) = &self.expander else {
            return queries;
        };

        match expander.expand(processed).await {
            Ok(expanded) => {
                self.counters.record_expansion();
                queries.extend(
                    expanded
                        .expanded_queries
                        .into_iter()
                        .map(|candidate| candidate.query)
                        .filter(|q| !q.trim().is_empty())
                        .take(self.config.multi_query.max_expansions),
                );
                debug!("Searching {} queries after expansion", queries.len());
            }
            Err(e) => warn!("Query expansion failed, searching original query only: {}", e),
        }
        queries
    }

    /// Rerank search results. Never fails; provider failures return the
    /// input unchanged.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        options: &RerankOptions,
    ) -> Vec<SearchResult> {
        if self.reranker.is_enabled() && !results.is_empty() {
            self.counters.record_rerank();
        }
        self.reranker.rerank(query, results, options).await
    }

    /// Embed raw fragments for indexing.
    ///
    /// Sparse vectors are attached when a sparse embedder is configured;
    /// sparse failures are logged and leave the chunks dense-only.
    pub async fn embed_chunks(&self, chunks: Vec<ChunkInput>) -> Result<Vec<EmbeddedChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let dense = self.embedder.embed_documents(&texts).await?;
        if dense.len() != texts.len() {
            return Err(RetrievalError::embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                dense.len()
            )));
        }

        let sparse: Vec<Option<SparseVector>> = match &self.sparse_embedder {
            Some(embedder) => match embedder.embed(&texts).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    vectors.into_iter().map(Some).collect()
                }
                Ok(vectors) => {
                    warn!(
                        "Sparse embedder returned {} vectors for {} texts, indexing dense only",
                        vectors.len(),
                        texts.len()
                    );
                    vec![None; texts.len()]
                }
                Err(e) => {
                    warn!("Sparse embedding failed, indexing dense only: {}", e);
                    vec![None; texts.len()]
                }
            },
            None => vec![None; texts.len()],
        };

        Ok(chunks
            .into_iter()
            .zip(dense)
            .zip(sparse)
            .map(|((chunk, dense), sparse)| {
                let mut metadata = chunk.metadata;
                metadata
                    .entry("content_hash")
                    .or_insert_with(|| Value::from(blake3::hash(chunk.content.as_bytes()).to_hex().to_string()));
                EmbeddedChunk {
                    content: chunk.content,
                    metadata,
                    dense,
                    sparse,
                }
            })
            .collect())
    }

    /// Index embedded chunks. Returns the number of points written.
    pub async fn add_documents(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let hybrid = self.schema.ensure_hybrid_compatible().await;
        let _guard = self.schema.lock_for_ingest().await;
        let sparse_name = &self.config.hybrid.sparse_vector_name;

        let points: Vec<Point> = chunks
            .into_iter()
            .map(|chunk| Point {
                id: Ulid::new().to_string(),
                vector: chunk.dense,
                sparse: chunk.sparse.filter(|_| hybrid).map(|vector| NamedSparseVector {
                    name: sparse_name.clone(),
                    vector,
                }),
                payload: Payload {
                    content: chunk.content,
                    metadata: chunk.metadata,
                },
            })
            .collect();

        for batch in points.chunks(self.config.store.batch_size.max(1)) {
            self.store.upsert(self.collection(), batch).await?;
            debug!("Upserted batch of {} points", batch.len());
        }

        info!(
            "Indexed {} points into '{}' (hybrid: {})",
            points.len(),
            self.collection(),
            hybrid
        );
        Ok(points.len())
    }

    /// List indexed documents, one entry per source file.
    pub async fn list_documents(&self, page: usize, page_size: usize) -> Result<DocumentPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1).checked_mul(page_size).ok_or_else(|| {
            RetrievalError::invalid_argument(format!("page {page} of size {page_size} is out of range"))
        })?;
        let request = ScrollRequest {
            filter: None,
            limit: page_size,
            offset: offset as u64,
            with_vectors: false,
        };
        let scroll = self.store.scroll(self.collection(), &request).await?;

        let mut documents: Vec<DocumentSummary> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for point in scroll.points {
            let metadata = &point.payload.metadata;
            let key = str_field(metadata, "file_hash")
                .map(str::to_string)
                .unwrap_or_else(|| point.id.clone());
            if !seen.insert(key) {
                continue;
            }

            documents.push(DocumentSummary {
                filename: str_field(metadata, "source_file")
                    .unwrap_or("unknown")
                    .to_string(),
                file_type: str_field(metadata, "file_type")
                    .unwrap_or("unknown")
                    .to_string(),
                file_size: metadata.get("file_size").and_then(Value::as_u64).unwrap_or(0),
                upload_date: metadata
                    .get("load_timestamp")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                chunk_count: metadata
                    .get("total_chunks")
                    .and_then(Value::as_u64)
                    .unwrap_or(1),
                id: point.id,
            });
        }

        let total_count = self
            .store
            .get_collection(self.collection())
            .await?
            .map(|info| info.points_count)
            .unwrap_or(0);

        Ok(DocumentPage {
            documents,
            total_count,
            page,
            page_size,
            has_next: scroll.next_offset.is_some(),
        })
    }

    /// Delete one point by id.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let deleted = self
            .store
            .delete_points(self.collection(), &[id.to_string()])
            .await?;
        if deleted == 0 {
            return Err(RetrievalError::PointNotFound { id: id.to_string() });
        }
        info!("Deleted point {}", id);
        Ok(())
    }

    /// All chunks of the document the given point belongs to, ordered by
    /// `chunk_index`.
    pub async fn get_document_chunks(&self, id: &str) -> Result<Vec<Payload>> {
        let points = self
            .store
            .retrieve(self.collection(), &[id.to_string()])
            .await?;
        let Some(point) = points.into_iter().next() else {
            warn!("Point {} not found", id);
            return Ok(Vec::new());
        };
        let Some(file_hash) = str_field(&point.payload.metadata, "file_hash").map(str::to_string)
        else {
            return Ok(vec![point.payload]);
        };

        let mut chunks = Vec::new();
        let mut offset = 0;
        loop {
            let request = ScrollRequest {
                filter: Some(MetadataFilter::new("file_hash", file_hash.clone())),
                limit: SCROLL_PAGE,
                offset,
                with_vectors: false,
            };
            let page = self.store.scroll(self.collection(), &request).await?;
            chunks.extend(page.points.into_iter().map(|p| p.payload));
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        chunks.sort_by_key(|c| c.metadata.get("chunk_index").and_then(Value::as_i64).unwrap_or(0));
        Ok(chunks)
    }

    /// Schema, point count and estimated size of the collection.
    pub async fn collection_info(&self) -> Result<CollectionDetails> {
        let details = match self.store.get_collection(self.collection()).await? {
            Some(info) => CollectionDetails::from_info(info),
            None => CollectionDetails::missing(self.collection(), self.schema.target_schema()),
        };
        Ok(details)
    }

    /// Remove every point, keeping an empty collection with the target
    /// schema.
    ///
    /// Recreates the collection; when that fails, deletes the points page by
    /// page instead. Returns whether the collection ended up empty.
    pub async fn delete_all_documents(&self) -> Result<bool> {
        let _guard = self.schema.lock_for_ingest().await;

        let initial = match self.store.get_collection(self.collection()).await? {
            Some(info) => info.points_count,
            None => {
                info!("Collection '{}' does not exist, nothing to delete", self.collection());
                return Ok(true);
            }
        };
        if initial == 0 {
            info!("Collection '{}' is already empty", self.collection());
            return Ok(true);
        }

        warn!("Deleting all {} points from '{}'", initial, self.collection());
        if let Err(e) = self.replace_collection().await {
            error!("Collection recreation failed: {}", e);
            if let Err(e) = self.delete_points_paged().await {
                warn!("Point-by-point deletion failed: {}", e);
            }
        }

        match self.store.get_collection(self.collection()).await? {
            Some(info) if info.points_count == 0 => {
                info!("Deleted all documents: {} -> 0 points", initial);
                Ok(true)
            }
            Some(info) => {
                warn!(
                    "Partial deletion: {} -> {} points remaining",
                    initial, info.points_count
                );
                Ok(false)
            }
            None => {
                error!("Collection '{}' is missing after deletion", self.collection());
                Ok(false)
            }
        }
    }

    /// Drop the collection and create it again with the target schema.
    pub async fn recreate_collection(&self) -> Result<()> {
        let _guard = self.schema.lock_for_ingest().await;
        self.replace_collection().await?;
        info!("Recreated collection '{}'", self.collection());
        Ok(())
    }

    /// Caller holds the ingest lock.
    async fn replace_collection(&self) -> Result<()> {
        match self.store.delete_collection(self.collection()).await {
            Ok(()) | Err(RetrievalError::CollectionNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.schema.invalidate();
        self.store
            .create_collection(self.collection(), self.schema.target_schema())
            .await
    }

    /// Caller holds the ingest lock.
    async fn delete_points_paged(&self) -> Result<u64> {
        if self.store.get_collection(self.collection()).await?.is_none() {
            self.store
                .create_collection(self.collection(), self.schema.target_schema())
                .await?;
            return Ok(0);
        }

        let mut deleted = 0u64;
        loop {
            let request = ScrollRequest {
                limit: SCROLL_PAGE,
                ..Default::default()
            };
            let page = self.store.scroll(self.collection(), &request).await?;
            if page.points.is_empty() {
                break;
            }
            let ids: Vec<String> = page.points.into_iter().map(|p| p.id).collect();
            let removed = self.store.delete_points(self.collection(), &ids).await?;
            if removed == 0 {
                break;
            }
            deleted += removed;
        }

        info!("Deleted {} points individually", deleted);
        Ok(deleted)
    }

    /// Copy of every point's payload, without vectors.
    pub async fn backup_metadata(&self) -> Result<Vec<MetadataBackup>> {
        let timestamp = unix_secs();
        let mut backup = Vec::new();
        let mut offset = 0;
        loop {
            let request = ScrollRequest {
                filter: None,
                limit: SCROLL_PAGE,
                offset,
                with_vectors: false,
            };
            let page = self.store.scroll(self.collection(), &request).await?;
            backup.extend(page.points.into_iter().map(|p| MetadataBackup {
                id: p.id,
                payload: p.payload,
                backup_timestamp: timestamp,
            }));
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        info!("Backed up metadata of {} points", backup.len());
        Ok(backup)
    }

    /// Counter snapshot plus collection facts.
    pub async fn stats(&self) -> RetrievalStats {
        let counters = self.counters.snapshot();
        let points_count = match self.store.get_collection(self.collection()).await {
            Ok(info) => info.map(|i| i.points_count).unwrap_or(0),
            Err(e) => {
                warn!("Failed to read collection info: {}", e);
                0
            }
        };
        let rrf = self.hybrid.rrf_params();

        RetrievalStats {
            total_searches: counters.total_searches,
            hybrid_searches: counters.hybrid_searches,
            native_fusion_searches: counters.native_fusion_searches,
            manual_fusion_searches: counters.manual_fusion_searches,
            dense_only_searches: counters.dense_only_searches,
            query_expansions: counters.query_expansions,
            rerank_requests: counters.rerank_requests,
            collection_name: self.collection().to_string(),
            points_count,
            hybrid_search_enabled: self.schema.hybrid_enabled(),
            sparse_embedder_available: self.hybrid.has_sparse_embedder(),
            dense_weight: rrf.dense_weight,
            sparse_weight: rrf.sparse_weight,
            reranking_enabled: self.reranker.is_enabled(),
            available_rerankers: self
                .reranker
                .available_providers()
                .into_iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

fn str_field<'a>(metadata: &'a retrieval_core::Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}
