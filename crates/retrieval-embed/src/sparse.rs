//! Sparse lexical embedder.

use std::collections::BTreeMap;

use async_trait::async_trait;

use retrieval_core::{Result, SparseEmbedder, SparseVector};

use crate::tokenize::features;

/// Sparse embedder producing hashed term weights.
///
/// Indices are the first four bytes of the feature's BLAKE3 hash; values are
/// `1 + ln(tf)`. Indices come out sorted and unique.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalSparseEmbedder;

impl LexicalSparseEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn embed_one(text: &str) -> SparseVector {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for feature in features(text) {
            let hash = blake3::hash(feature.as_bytes());
            let mut idx = [0u8; 4];
            idx.copy_from_slice(&hash.as_bytes()[..4]);
            *counts.entry(u32::from_le_bytes(idx)).or_insert(0) += 1;
        }

        let (indices, values) = counts
            .into_iter()
            .map(|(idx, tf)| (idx, 1.0 + (tf as f32).ln()))
            .unzip();

        SparseVector { indices, values }
    }
}

#[async_trait]
impl SparseEmbedder for LexicalSparseEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|text| Self::embed_one(text)).collect())
    }
}
