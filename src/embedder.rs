//! The default `Embedder` implementation: a deterministic hashing
//! projection, grounded on the teacher's `embeddings.rs` provider shape
//! (`EmbeddingConfig` / `EmbeddingProvider`) but swapping the ONNX model for
//! a seeded n-gram hash so the store, top-k ranking, and content-hash-gated
//! doc indexer are all exercisable without a model file. A production
//! deployment supplies its own `Embedder` (ONNX, a hosted API) through the
//! trait in `crate::interfaces`.

use crate::error::KnowledgeError;
use crate::interfaces::Embedder;
use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// L2-normalize a vector in place so cosine similarity reduces to a dot
/// product (spec §4.5). A zero vector is left as-is — its dot product with
/// anything is 0, which is the correct "no similarity" answer.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a vector as little-endian bytes for the `knowledge_embeddings.vector`
/// BLOB column.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`encode_vector`] back into a vector.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Deterministic, dependency-light embedder: each output dimension is the
/// sum of SHA-256-derived weights over the text's word trigrams, seeded by
/// dimension index so distinct dimensions decorrelate. Two calls with the
/// same text and `model_id` always produce the same vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(anyhow::anyhow!(KnowledgeError::invalid_input(
                "embedder dimension must be non-zero"
            )));
        }
        Ok(Self {
            model_id: model_id.into(),
            dimension,
        })
    }

    /// The crate's default configuration: a 64-dimension hashing embedder.
    pub fn default_model() -> Self {
        Self::new("hashing-v1", 64).expect("dimension 64 is non-zero")
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0f32; self.dimension];
        if tokens.is_empty() {
            return vector;
        }

        for window in tokens.windows(3.min(tokens.len().max(1))) {
            let gram = window.join(" ");
            let mut hasher = Sha256::new();
            hasher.update(self.model_id.as_bytes());
            hasher.update(b":");
            hasher.update(gram.as_bytes());
            let digest = hasher.finalize();
            for (i, slot) in vector.iter_mut().enumerate() {
                let byte = digest[i % digest.len()];
                let sign = if (byte & 1) == 0 { 1.0 } else { -1.0 };
                *slot += sign * ((byte as f32 + 1.0) / 256.0);
            }
        }

        normalize_l2(&mut vector);
        vector
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(anyhow::anyhow!(KnowledgeError::invalid_input(
                "cannot embed empty text"
            )));
        }
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_sync_checked(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl HashingEmbedder {
    fn embed_sync_checked(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(anyhow::anyhow!(KnowledgeError::invalid_input(
                "cannot embed empty text"
            )));
        }
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_is_deterministic() {
        let embedder = HashingEmbedder::default_model();
        let a = embedder.embed("cache eviction policy").await.unwrap();
        let b = embedder.embed("cache eviction policy").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dimension());
    }

    #[tokio::test]
    async fn embed_differs_for_different_text() {
        let embedder = HashingEmbedder::default_model();
        let a = embedder.embed("cache eviction policy").await.unwrap();
        let b = embedder.embed("parser relationship pass").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embed_rejects_empty_text() {
        let embedder = HashingEmbedder::default_model();
        assert!(embedder.embed("").await.is_err());
    }

    #[test]
    fn vector_encoding_round_trips() {
        let v = vec![1.0f32, -2.5, 0.0, 3.25];
        let bytes = encode_vector(&v);
        assert_eq!(decode_vector(&bytes), v);
    }

    #[test]
    fn normalize_l2_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
