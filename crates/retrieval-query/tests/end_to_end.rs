//! End-to-end search over the SQLite store with the deterministic embedders.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use retrieval_core::{ChunkInput, Metadata, RerankProvider, RetrievalConfig, Result};
use retrieval_embed::{HashingEmbedder, LexicalSparseEmbedder};
use retrieval_query::{
    RerankOptions, RerankingPipeline, RetrievalOrchestrator, SearchOptions, SearchResult,
};
use retrieval_rerank::{ChatModel, LlmJudgeReranker};
use retrieval_store::SqliteStore;

const MATCHING: [&str; 3] = [
    "임대료 인상 한도는 연 5퍼센트입니다",
    "임대료 인상은 계약 갱신 시에만 가능합니다",
    "주택 임대료 인상 한도는 법으로 정해져 있습니다",
];

const UNRELATED: [&str; 2] = [
    "오늘 날씨는 맑고 화창합니다",
    "고양이는 하루에 열여섯 시간을 잡니다",
];

const QUERY: &str = "임대료 인상 한도는?";

/// Chat model that never answers with JSON.
struct ChattyModel;

#[async_trait]
impl ChatModel for ChattyModel {
    fn name(&self) -> &str {
        "chatty"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok("These all look relevant to me, hard to say which is best.".to_string())
    }
}

fn config(sparse_enabled: bool) -> RetrievalConfig {
    let mut config = RetrievalConfig::default();
    config.embedding.sparse_enabled = sparse_enabled;
    config.reranking.enabled = true;
    config.reranking.default_provider = RerankProvider::LlmJudge;
    config
}

async fn engine(
    sparse_enabled: bool,
) -> RetrievalOrchestrator<SqliteStore, HashingEmbedder> {
    let config = config(sparse_enabled);
    let reranking = RerankingPipeline::new(&config.reranking).with_provider(
        RerankProvider::LlmJudge,
        Arc::new(LlmJudgeReranker::new(
            Arc::new(ChattyModel),
            &config.reranking.llm_judge,
        )),
    );

    let engine = RetrievalOrchestrator::builder(
        Arc::new(SqliteStore::open_memory().unwrap()),
        Arc::new(HashingEmbedder::new()),
        config,
    )
    .sparse_embedder(Arc::new(LexicalSparseEmbedder::new()))
    .reranking(reranking)
    .build();

    engine.initialize().await.unwrap();

    let chunks: Vec<ChunkInput> = MATCHING
        .iter()
        .chain(UNRELATED.iter())
        .enumerate()
        .map(|(i, text)| {
            let mut metadata = Metadata::new();
            metadata.insert("file_hash".into(), json!(format!("doc{i}")));
            metadata.insert("chunk_index".into(), json!(0));
            ChunkInput {
                content: text.to_string(),
                metadata,
            }
        })
        .collect();
    let embedded = engine.embed_chunks(chunks).await.unwrap();
    assert_eq!(engine.add_documents(embedded).await.unwrap(), 5);

    engine
}

fn assert_well_formed(results: &[SearchResult], limit: usize, min_score: f32) {
    assert!(results.len() <= limit);
    assert!(results.iter().all(|r| r.score >= min_score));
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    let ids: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), results.len());
}

#[tokio::test]
async fn test_hybrid_search_properties() {
    let engine = engine(true).await;

    let options = SearchOptions {
        limit: Some(5),
        min_score: Some(0.5),
    };
    let results = engine.search(QUERY, options).await;
    assert!(!results.is_empty());
    assert_well_formed(&results, 5, 0.5);
    assert!(results.iter().all(|r| MATCHING.contains(&r.content.as_str())));

    // Same gate through the configured defaults
    let defaults = engine.search(QUERY, SearchOptions::default()).await;
    assert!(!defaults.is_empty());
    assert!(defaults.iter().all(|r| r.score >= 0.5));

    let stats = engine.stats().await;
    assert!(stats.hybrid_search_enabled);
    assert_eq!(stats.native_fusion_searches, 2);
}

#[tokio::test]
async fn test_hybrid_search_keeps_only_matching_fragments() {
    let engine = engine(true).await;

    let options = SearchOptions {
        limit: Some(5),
        min_score: Some(0.0),
    };
    let results = engine.search(QUERY, options).await;
    assert_well_formed(&results, 5, 0.0);

    let contents: HashSet<&str> = results.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, MATCHING.into_iter().collect());
}

#[tokio::test]
async fn test_dense_only_search_properties() {
    let engine = engine(false).await;

    let options = SearchOptions {
        limit: Some(5),
        min_score: Some(0.5),
    };
    let results = engine.search(QUERY, options).await;
    assert_well_formed(&results, 5, 0.5);
    assert_eq!(results[0].content, MATCHING[0]);
    assert!(results.iter().all(|r| !UNRELATED.contains(&r.content.as_str())));

    let stats = engine.stats().await;
    assert!(!stats.hybrid_search_enabled);
    assert_eq!(stats.dense_only_searches, 1);
}

#[tokio::test]
async fn test_non_json_judge_keeps_original_order() {
    let engine = engine(true).await;

    let results = engine
        .search(
            QUERY,
            SearchOptions {
                limit: Some(5),
                min_score: Some(0.0),
            },
        )
        .await;
    assert!(results.len() >= 2);

    let options = RerankOptions {
        top_k: Some(2),
        ..Default::default()
    };
    let reranked = engine.rerank(QUERY, results.clone(), &options).await;

    assert_eq!(reranked, results[..2].to_vec());
    assert_eq!(engine.stats().await.rerank_requests, 1);
}
