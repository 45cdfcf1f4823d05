//! Ebbinghaus-style dormancy transitions.

use chrono::{DateTime, Utc};

use crate::confidence::{confidence, ConfidenceInputs, MemoryHalfLife};
use crate::error::Result;
use crate::store::Store;
use crate::types::{MemoryKind, MemoryState, Source};

pub const DEFAULT_DORMANT_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayReport {
    pub total_evaluated: u64,
    pub transitioned_to_dormant: u64,
    pub timestamp: DateTime<Utc>,
}

/// Scan every `active` semantic/procedure, transition to `dormant` when
/// confidence drops below `dormant_threshold`. Rows already in a terminal
/// or non-active state are skipped entirely.
pub fn decay(store: &Store, dormant_threshold: Option<f64>) -> Result<DecayReport> {
    let threshold = dormant_threshold.unwrap_or(DEFAULT_DORMANT_THRESHOLD);
    let now = Utc::now();

    let mut total_evaluated = 0u64;
    let mut transitioned = 0u64;

    for kind in [MemoryKind::Semantic, MemoryKind::Procedural] {
        for memory in store.all_in_state(kind, MemoryState::Active)? {
            total_evaluated += 1;

            let age_days = (now - memory.created_at).num_seconds() as f64 / 86_400.0;
            let last_touch = memory.last_reinforced_at.unwrap_or(memory.created_at);
            let days_since_retrieval = (now - last_touch).num_seconds() as f64 / 86_400.0;
            let half_life = match kind {
                MemoryKind::Semantic => MemoryHalfLife::Semantic,
                MemoryKind::Procedural => MemoryHalfLife::Procedural,
            };

            let c = confidence(ConfidenceInputs {
                source: Source::DirectObservation,
                support: memory.supporting_count as f64,
                contradict: memory.contradicting_count as f64,
                age_days,
                half_life_days: half_life.days(),
                retrieval_count: memory.retrieval_count,
                days_since_retrieval,
            });

            if c < threshold {
                store.set_generalized_state(kind, &memory.id, MemoryState::Dormant)?;
                transitioned += 1;
                tracing::info!(memory_id = %memory.id, confidence = c, threshold, "memory transitioned to dormant");
            }
        }
    }

    Ok(DecayReport { total_evaluated, transitioned_to_dormant: transitioned, timestamp: now })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;
    use crate::types::GeneralizedMemory;
    use chrono::Duration;

    fn aged_semantic(supporting: u64, contradicting: u64, age_days: i64) -> GeneralizedMemory {
        GeneralizedMemory {
            id: ids::new_id(),
            content: "old unsupported claim".to_string(),
            embedding: Some(vec![1.0, 0.0, 0.0, 0.0]),
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
        }
    }

    #[test]
    fn heavily_contradicted_old_memory_goes_dormant() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Some(4)).unwrap();
        let memory = aged_semantic(0, 3, 120);
        let id = memory.id.clone();
        store.insert_generalized(MemoryKind::Semantic, &memory).unwrap();

        let report = decay(&store, Some(0.3)).unwrap();
        assert!(report.transitioned_to_dormant >= 1);

        let reloaded = store.get_generalized(MemoryKind::Semantic, &id).unwrap().unwrap();
        assert_eq!(reloaded.state, MemoryState::Dormant);
    }

    #[test]
    fn already_dormant_memory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Some(4)).unwrap();
        let mut memory = aged_semantic(0, 3, 120);
        memory.state = MemoryState::Dormant;
        store.insert_generalized(MemoryKind::Semantic, &memory).unwrap();

        let report = decay(&store, Some(0.3)).unwrap();
        assert_eq!(report.total_evaluated, 0);
        assert_eq!(report.transitioned_to_dormant, 0);
    }

    #[test]
    fn fresh_well_supported_memory_stays_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Some(4)).unwrap();
        let memory = aged_semantic(10, 0, 0);
        let id = memory.id.clone();
        store.insert_generalized(MemoryKind::Semantic, &memory).unwrap();

        decay(&store, None).unwrap();

        let reloaded = store.get_generalized(MemoryKind::Semantic, &id).unwrap().unwrap();
        assert_eq!(reloaded.state, MemoryState::Active);
    }
}
