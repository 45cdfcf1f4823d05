//! Vector search. Recall only ever needs cosine kNN — no keyword/BM25, RRF
//! fusion, HyDE expansion, or reranking, so this module carries only the
//! `VectorIndex` the Store embeds.

mod vector;

pub use vector::{VectorIndex, VectorIndexConfig, VectorSearchError, OVERFETCH};
