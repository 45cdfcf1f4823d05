//! Embedding adapter.
//!
//! A pluggable, `async_trait`-based capability trait for swappable
//! embedding backends, plus the concrete vector helpers
//! (`cosine_similarity`, `vector_to_bytes`/`bytes_to_vector`) every
//! implementation shares.

use crate::error::{CoreError, Result};
use async_trait::async_trait;

/// Dimension-agnostic deterministic capability: text → unit-norm vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed output dimensionality. Every vector this provider returns has
    /// exactly this length.
    fn dimensions(&self) -> usize;

    /// Name of the underlying model, recorded on every embedded entity.
    fn model_name(&self) -> &str;

    /// Version of the underlying model, recorded on every embedded entity.
    fn model_version(&self) -> &str;

    /// Embed one piece of text. The returned vector is unit-normalized.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many pieces of text in one round-trip.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Serialize a vector to its storage representation (little-endian f32s).
    fn vector_to_bytes(&self, v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize a vector from its storage representation.
    fn bytes_to_vector(&self, b: &[u8]) -> Vec<f32> {
        b.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Cosine similarity between two equal-length vectors. Returns `0.0` on a
/// dimension mismatch rather than panicking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Normalize a vector to unit length in place.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic mock provider: hashes the input text with `blake3` into a
/// pseudo-random unit-normalized vector. Ships as the zero-config default
/// and for tests, where a real embedding model would be overkill.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-hash-embedding"
    }

    fn model_version(&self) -> &str {
        "1"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(CoreError::InvalidInput("content must not be empty".into()));
        }
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut counter: u64 = 0;
        while vector.len() < self.dimensions {
            let mut hasher = blake3::Hasher::new();
            hasher.update(text.as_bytes());
            hasher.update(&counter.to_le_bytes());
            let hash = hasher.finalize();
            for chunk in hash.as_bytes().chunks_exact(4) {
                if vector.len() == self.dimensions {
                    break;
                }
                let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map to [-1, 1] so the resulting vector normalizes to a
                // well-distributed point on the unit hypersphere.
                let value = (bits as f64 / u32::MAX as f64) * 2.0 - 1.0;
                vector.push(value as f32);
            }
            counter += 1;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}
