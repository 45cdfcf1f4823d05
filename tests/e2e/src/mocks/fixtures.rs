//! Fixture builders for journey tests.

use chrono::{Duration, Utc};
use engram_core::{EncodeRequest, GeneralizedMemory, MemoryKind, MemoryState, Source, Store};

pub struct TestDataFactory;

impl TestDataFactory {
    /// A plain direct-observation episode request.
    pub fn episode(content: impl Into<String>) -> EncodeRequest {
        EncodeRequest::new(content, Source::DirectObservation)
    }

    /// An episode request tagged with an explicit source, for scenarios
    /// that care about source-type diversity.
    pub fn episode_with_source(content: impl Into<String>, source: Source) -> EncodeRequest {
        EncodeRequest::new(content, source)
    }

    /// Inserts an active semantic memory directly into `store`, bypassing
    /// encode/consolidate, so its `created_at`/evidence counts can be
    /// pinned exactly — needed for decay and recall-ordering scenarios
    /// that require a specific age or support count rather than whatever
    /// `consolidate` would produce.
    #[allow(clippy::too_many_arguments)]
    pub fn seed_semantic(
        store: &Store,
        content: &str,
        embedding: Vec<f32>,
        supporting: u64,
        contradicting: u64,
        age_days: i64,
    ) -> GeneralizedMemory {
        let memory = GeneralizedMemory {
            id: engram_core::ids::new_id(),
            content: content.to_string(),
            embedding: Some(embedding),
            state: MemoryState::Active,
            conditions: None,
            evidence_episode_ids: vec![],
            evidence_count: supporting,
            supporting_count: supporting,
            contradicting_count: contradicting,
            source_type_diversity: 1,
            consolidation_checkpoint: None,
            embedding_model: "mock".into(),
            embedding_version: "1".into(),
            consolidation_model: None,
            consolidation_prompt_hash: None,
            created_at: Utc::now() - Duration::days(age_days),
            last_reinforced_at: None,
            retrieval_count: 0,
            challenge_count: 0,
        };
        store.insert_generalized(MemoryKind::Semantic, &memory).expect("failed to seed semantic memory");
        memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_request_carries_the_given_content() {
        let request = TestDataFactory::episode("a fact");
        assert_eq!(request.content, "a fact");
        assert_eq!(request.source, Source::DirectObservation);
    }
}
