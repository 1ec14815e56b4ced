//! Dense feature-hashing embedder.

use async_trait::async_trait;
use tracing::debug;

use retrieval_core::{DenseEmbedder, Result, RetrievalError};

use crate::tokenize::features;

/// Dense embedder that hashes text features into a fixed number of buckets.
///
/// Each feature is hashed with BLAKE3; the first eight bytes pick the bucket
/// and the ninth byte picks the sign. The result is L2 normalized, so cosine
/// similarity reflects shared vocabulary. Text without features embeds to the
/// zero vector.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder with the default dimension (384).
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    /// Create an embedder with a custom dimension.
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrievalError::invalid_argument(
                "embedding dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for feature in features(text) {
            let hash = blake3::hash(feature.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DenseEmbedder for HashingEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::embedding("embedder returned no vector"))
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding {} texts (dim {})", texts.len(), self.dimension);
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_hashing_embedder() {
        let embedder = HashingEmbedder::new();
        assert_eq!(embedder.dimension(), 384);

        let texts = ["Hello world", "Rust is great"];
        let embeddings = embedder.embed_documents(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);

        // Check L2 normalization
        let norm: f32 = embeddings[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_deterministic_embeddings() {
        let embedder = HashingEmbedder::new();

        let e1 = embedder.embed_query("consistent input").await.unwrap();
        let e2 = embedder.embed_query("consistent input").await.unwrap();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::with_dimension(256).unwrap();

        let query = embedder.embed_query("임대료 인상 한도").await.unwrap();
        let related = embedder
            .embed_query("임대료 인상 한도는 연 5퍼센트입니다")
            .await
            .unwrap();
        let unrelated = embedder
            .embed_query("오늘 날씨는 맑고 화창합니다")
            .await
            .unwrap();

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
        assert!(cosine(&query, &related) > 0.2);
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::with_dimension(8).unwrap();
        let embedding = embedder.embed_query("?!").await.unwrap();
        assert!(embedding.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedder::with_dimension(0).is_err());
    }
}
