//! retrieval-query - Hybrid search and retrieval orchestration
//!
//! This crate turns a vector store, a dense embedder and (optionally) a
//! sparse embedder into a search engine that degrades instead of failing.
//!
//! # Features
//!
//! - Lazy, once-per-process schema check with dense-only to hybrid migration
//! - Three search tiers: store-side fusion, local weighted RRF, dense-only
//! - Multi-query fusion with a diversity bonus for expanded queries
//! - Lexical quality validation of semantic results
//! - Document indexing and management over the same collection
//!
//! # Example
//!
//! ```rust,ignore
//! use retrieval_query::{RetrievalOrchestrator, SearchOptions};
//! use std::sync::Arc;
//!
//! let engine = RetrievalOrchestrator::builder(Arc::new(store), Arc::new(embedder), config)
//!     .sparse_embedder(Arc::new(LexicalSparseEmbedder::new()))
//!     .build();
//! engine.initialize().await?;
//! let results = engine.search("임대료 인상 한도는?", SearchOptions::default()).await;
//! ```

mod engine;
mod fusion;
mod hybrid;
mod quality;
mod schema;
mod stats;

#[cfg(test)]
mod test_support;

pub use engine::{OrchestratorBuilder, RetrievalOrchestrator, SearchOptions};
pub use fusion::{fuse_multi_query, reciprocal_rank_fusion, RrfParams, SubqueryResults};
pub use hybrid::{normalize_similarity, HybridSearchEngine, SearchTier, TieredResults};
pub use quality::{preprocess_query, ResultQualityValidator};
pub use schema::CollectionSchemaManager;
pub use stats::{CounterSnapshot, SearchCounters};

// Re-export for convenience
pub use retrieval_core::{SearchResult, RetrievalStats};
pub use retrieval_rerank::{RerankOptions, RerankingPipeline};
