//! retrieval-rerank - Second-pass relevance scoring
//!
//! This crate provides the [`RerankingPipeline`], which dispatches a ranked
//! candidate list to one configured provider and isolates its failures:
//!
//! - [`CrossEncoderReranker`]: batch cross-encoder rerank API
//! - [`HttpEndpointReranker`]: plain HTTP rerank endpoint with bearer auth
//! - [`LlmJudgeReranker`]: a chat model asked to score candidates as JSON
//!
//! A provider failure never reaches the caller; the pipeline hands back the
//! results it was given.

mod http;
mod llm;
mod pipeline;

pub use http::{CrossEncoderReranker, HttpEndpointReranker};
pub use llm::{extract_json_object, ChatModel, LlmJudgeReranker, OpenAiChatModel};
pub use pipeline::{RerankOptions, RerankingPipeline};

pub use retrieval_core::Reranker;
