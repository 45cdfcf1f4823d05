mod embeddings;
mod fixtures;

pub use embeddings::FixedVectorEmbeddingProvider;
pub use fixtures::TestDataFactory;
