//! A controllable embedder for scenarios that need a specific cosine
//! similarity between two pieces of content (contradiction-zone tests,
//! recall-ordering ties) rather than whatever a content hash happens to
//! produce.

use std::collections::HashMap;

use async_trait::async_trait;
use engram_core::{EmbeddingProvider, MockEmbeddingProvider, Result};

/// Returns a pinned vector for any content registered via
/// [`FixedVectorEmbeddingProvider::with`]; falls through to a hash-based
/// mock embedding for anything else.
pub struct FixedVectorEmbeddingProvider {
    overrides: HashMap<String, Vec<f32>>,
    fallback: MockEmbeddingProvider,
}

impl FixedVectorEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { overrides: HashMap::new(), fallback: MockEmbeddingProvider::new(dimensions) }
    }

    pub fn with(mut self, content: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(content.into(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedVectorEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.fallback.dimensions()
    }

    fn model_name(&self) -> &str {
        "fixed-vector-test-embedding"
    }

    fn model_version(&self) -> &str {
        "1"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.overrides.get(text) {
            return Ok(vector.clone());
        }
        self.fallback.embed(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_content_returns_the_pinned_vector() {
        let provider = FixedVectorEmbeddingProvider::new(4).with("x", vec![1.0, 0.0, 0.0, 0.0]);
        let embedding = provider.embed("x").await.unwrap();
        assert_eq!(embedding, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn unregistered_content_falls_back_to_the_mock_embedder() {
        let provider = FixedVectorEmbeddingProvider::new(4).with("x", vec![1.0, 0.0, 0.0, 0.0]);
        let embedding = provider.embed("y").await.unwrap();
        assert_eq!(embedding.len(), 4);
    }
}
