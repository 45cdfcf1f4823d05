//! Isolated `Brain` instances for journey tests.
//!
//! Every test gets its own temp directory so concurrent `cargo test` runs
//! never share a database file.

use std::path::Path;
use std::sync::Arc;

use engram_core::{Brain, Config, EmbeddingProvider, LlmProvider, MockEmbeddingProvider};
use tempfile::TempDir;

/// A `Brain` opened against a throwaway temp directory, kept alive for the
/// duration of the test via `_dir`.
pub struct TestBrain {
    pub brain: Brain,
    _dir: TempDir,
}

impl TestBrain {
    /// Opens a Brain with a 16-dimension mock embedder and no LLM.
    pub async fn new() -> Self {
        Self::custom(Arc::new(MockEmbeddingProvider::new(16)), None).await
    }

    pub async fn with_dimensions(dimensions: usize) -> Self {
        Self::custom(Arc::new(MockEmbeddingProvider::new(dimensions)), None).await
    }

    /// Opens a Brain with an LLM adapter wired in, for contradiction /
    /// truth-resolution / causal-mechanism scenarios.
    pub async fn with_llm(llm: Arc<dyn LlmProvider>) -> Self {
        Self::custom(Arc::new(MockEmbeddingProvider::new(16)), Some(llm)).await
    }

    /// Full control over both capability adapters, for scenarios that need
    /// a specific embedding (e.g. to land inside the contradiction-zone
    /// similarity band) alongside a specific LLM response.
    pub async fn custom(embedder: Arc<dyn EmbeddingProvider>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let mut config = Config::new(dir.path(), "test-agent", embedder);
        if let Some(llm) = llm {
            config = config.with_llm(llm);
        }
        let brain = Brain::open(config).await.expect("failed to open test brain");
        Self { brain, _dir: dir }
    }

    pub fn path(&self) -> &Path {
        self._dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_against_an_isolated_temp_directory() {
        let a = TestBrain::new().await;
        let b = TestBrain::new().await;
        assert_ne!(a.path(), b.path());
    }
}
