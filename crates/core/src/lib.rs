//! # Engram Core
//!
//! A cognitive memory engine that separates raw observation from validated
//! belief. Rather than one flat memory store, the engine keeps:
//!
//! - **Episodes** — immutable, timestamped, source-attributed observations.
//! - **Semantics / Procedures** — generalized memories promoted from
//!   recurring episodes, each carrying supporting/contradicting evidence
//!   counts and a state machine (`active`, `disputed`, `context_dependent`,
//!   `dormant`, `rolled_back`).
//! - **Contradictions** — detected disagreements between a new observation
//!   and an existing belief, resolvable by an LLM-backed Truth Resolver.
//! - **Causal links** — typed cause/effect edges between any two memories,
//!   traversable in bounded, cycle-guarded BFS.
//!
//! Confidence is never stored; it is a pure function of source reliability,
//! evidence agreement, Ebbinghaus-style recency decay, and retrieval
//! reinforcement, recomputed on every read (`confidence`).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<()> {
//! let embedding: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(256));
//! let brain = Brain::open(Config::new("./data", "my-agent", embedding)).await?;
//!
//! let episode_id = brain.encode(EncodeRequest::new(
//!     "Stripe API returned 429 after 100 req/s",
//!     Source::DirectObservation,
//! )).await?;
//!
//! let hits = brain.recall(RecallRequest::new("Stripe rate limit")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `bundled-sqlite` (default): statically link SQLite via `rusqlite`'s
//!   `bundled` feature, so the crate has no system SQLite dependency.
//! - `vector-search` (default): HNSW cosine search via `usearch`, backing
//!   `recall`'s nearest-neighbor step. Disabling it is only useful for
//!   environments that cannot load a native index library.
//! - `encryption`: swaps in SQLCipher (`rusqlite`'s `bundled-sqlcipher`)
//!   for at-rest encryption of the database file.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod brain;
pub mod causal;
pub mod confidence;
pub mod consolidator;
pub mod decay;
pub mod embeddings;
pub mod encoder;
pub mod error;
pub mod events;
pub mod ids;
pub mod introspect;
pub mod llm;
pub mod recall;
pub mod rollback;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub mod search;

pub mod store;
pub mod truth;
pub mod types;
pub mod validator;

pub use brain::{Brain, Config};
pub use causal::{CausalLinkRequest, DEFAULT_MAX_DEPTH};
pub use confidence::{confidence, ConfidenceInputs, MemoryHalfLife};
pub use consolidator::{ConsolidateOptions, ConsolidateReport, ExtractPrinciple, Principle};
pub use decay::DecayReport;
pub use embeddings::{cosine_similarity, EmbeddingProvider, MockEmbeddingProvider};
pub use encoder::EncodeRequest;
pub use error::{CoreError, Result};
pub use events::Event;
pub use introspect::IntrospectReport;
pub use llm::{Completion, LlmProvider, Message, MockLlmProvider, Role};
pub use recall::{QueryType, RecallRequest};
pub use rollback::RollbackReport;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub use search::{VectorIndex, VectorIndexConfig, VectorSearchError};

pub use store::Store;
pub use types::{
    CausalLink, ClaimType, ConsolidationRun, Contradiction, ContradictionState, Episode,
    GeneralizedMemory, LinkType, MemoryKind, MemoryState, RecallEntry, RecallType, Resolution,
    ResolutionVerdict, RunStatus, Source,
};
pub use validator::ValidationOutcome;

/// Everything a caller typically needs in scope, re-exported in one place.
/// `use engram_core::prelude::*;` pulls in `Brain`, `Config`, the core
/// request/result types, and the capability traits.
pub mod prelude {
    pub use crate::brain::{Brain, Config};
    pub use crate::confidence::{confidence, ConfidenceInputs};
    pub use crate::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
    pub use crate::encoder::EncodeRequest;
    pub use crate::error::{CoreError, Result};
    pub use crate::events::Event;
    pub use crate::llm::{LlmProvider, MockLlmProvider};
    pub use crate::recall::{QueryType, RecallRequest};
    pub use crate::types::{
        CausalLink, Contradiction, Episode, GeneralizedMemory, LinkType, MemoryKind, MemoryState,
        RecallEntry, Source,
    };
}
