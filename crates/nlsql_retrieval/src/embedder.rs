//! Embedding capability backing C6's `record`/`search` (§4.6). Kept as a
//! small capability trait in this crate, in the same style as the core's
//! `LlmProvider`/`VectorBackend`, so a real embedding provider can be
//! plugged in without touching `RetrievalStore`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EmbedError {
    #[error("embedding provider error: {0}")]
    ProviderError(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    fn dimension(&self) -> usize;
}

/// Deterministic, dependency-free default: feature-hashes whitespace tokens
/// into a fixed-size bag-of-words vector, L2-normalized. Good enough to
/// exercise C6's cosine-similarity contract without a real embedding API;
/// swap in a provider-backed `Embedder` for production-quality recall.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let bucket = token_hash(token) as usize % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn token_hash(token: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("list all vendors").await.unwrap();
        let b = embedder.embed("list all vendors").await.unwrap();
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn embed_differs_for_different_text() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("list all vendors").await.unwrap();
        let b = embedder.embed("show every invoice").await.unwrap();
        assert_ne!(a, b);
    }
}
