//! retrieval-embed - Deterministic text embedders
//!
//! This crate provides embedders that need no model files:
//!
//! - [`HashingEmbedder`]: dense feature-hashing embeddings, L2 normalized
//! - [`LexicalSparseEmbedder`]: sparse hashed term weights for lexical matching
//!
//! Both share one tokenizer (lowercased letter/digit runs plus character
//! bigrams of longer words, which lets agglutinative forms such as Korean
//! nouns with attached particles still overlap).

mod hashing;
mod sparse;
mod tokenize;

pub use hashing::HashingEmbedder;
pub use sparse::LexicalSparseEmbedder;
pub use tokenize::features;

// Re-export the embedder traits for convenience
pub use retrieval_core::{DenseEmbedder, SparseEmbedder};
