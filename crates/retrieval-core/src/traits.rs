//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CollectionInfo, CollectionSchema, ExpandedQuery, FusionQuery, Point, QueryVector, Ranking,
    RerankDocument, ScoredPoint, ScrollPage, ScrollRequest, SparseVector,
};

/// Vector store holding named collections of points.
#[async_trait]
pub trait VectorStore: Send + Sync {
    // Collection operations
    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()>;
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;
    async fn delete_collection(&self, name: &str) -> Result<()>;

    // Point operations
    async fn upsert(&self, collection: &str, points: &[Point]) -> Result<()>;
    async fn scroll(&self, collection: &str, request: &ScrollRequest) -> Result<ScrollPage>;
    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>>;
    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<u64>;

    // Search operations

    /// Single-vector similarity search, best first.
    async fn search(
        &self,
        collection: &str,
        query: &QueryVector,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Prefetch + reciprocal-rank-fusion query, best first.
    async fn query_fused(&self, collection: &str, query: &FusionQuery) -> Result<Vec<ScoredPoint>>;
}

/// Dense embedding model.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Sparse (lexical) embedding model.
#[async_trait]
pub trait SparseEmbedder: Send + Sync {
    /// Embed a batch of texts, one sparse vector per text.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<SparseVector>>;
}

/// Query expansion engine.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// Expand a query into related queries.
    async fn expand(&self, query: &str) -> Result<ExpandedQuery>;
}

/// A reranking provider.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Provider name used in logs and statistics.
    fn name(&self) -> &str;

    /// Score candidates against the query and return at most `top_k`
    /// judgements, best first.
    async fn score(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_k: usize,
    ) -> Result<Ranking>;
}
