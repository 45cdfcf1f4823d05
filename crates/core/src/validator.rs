//! Reinforcement / contradiction detection.
//!
//! Runs after an episode is already committed by [`crate::encoder`]. The
//! Brain façade fires this as a detached task; failures are reported on the
//! error channel rather than bubbling into the caller of `encode`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::ids;
use crate::llm::{LlmProvider, Message};
use crate::store::Store;
use crate::types::{
    ClaimType, Contradiction, ContradictionState, MemoryKind, MemoryState, Resolution, ResolutionVerdict, Source,
};

/// `sim ≥ REINFORCEMENT_THRESHOLD` reinforces the closest semantic.
pub const REINFORCEMENT_THRESHOLD: f32 = 0.85;
/// `CONTRADICTION_FLOOR ≤ sim < REINFORCEMENT_THRESHOLD` opens the
/// contradiction branch, if an LLM is configured.
pub const CONTRADICTION_FLOOR: f32 = 0.60;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Reinforced { semantic_id: String },
    Contradiction { contradiction_id: String },
    None,
}

/// Finds the closest active semantic and either reinforces it, opens a
/// contradiction, or does nothing. Embedding the episode is the caller's
/// job — it is already persisted with its vector by the time this runs.
pub async fn validate(
    store: &Store,
    episode_id: &str,
    content: &str,
    embedding: &[f32],
    source: Source,
    llm: Option<&Arc<dyn LlmProvider>>,
) -> Result<ValidationOutcome> {
    let Some((semantic, similarity)) = store.closest_active_semantic(embedding)? else {
        return Ok(ValidationOutcome::None);
    };

    if similarity >= REINFORCEMENT_THRESHOLD {
        store.reinforce_generalized(MemoryKind::Semantic, &semantic.id, episode_id, source, Utc::now())?;
        tracing::info!(semantic_id = %semantic.id, similarity, "episode reinforced existing semantic");
        return Ok(ValidationOutcome::Reinforced { semantic_id: semantic.id });
    }

    if similarity < CONTRADICTION_FLOOR {
        return Ok(ValidationOutcome::None);
    }

    let Some(llm) = llm else {
        return Ok(ValidationOutcome::None);
    };

    let prompt = format!(
        "Does the new claim contradict the existing claim?\n\
         Existing: {}\n\
         New: {}\n\
         Respond as JSON with keys \"contradicts\" (bool), \"resolution\" \
         (one of \"new_wins\", \"existing_wins\", \"context_dependent\", or null), \
         \"conditions\" (object or null), \"explanation\" (string).",
        semantic.content, content,
    );
    let response = llm.json(&[Message::user(prompt)]).await?;

    let contradicts = response.get("contradicts").and_then(|v| v.as_bool()).unwrap_or(false);
    if !contradicts {
        return Ok(ValidationOutcome::None);
    }

    let resolution_field = response.get("resolution").and_then(|v| v.as_str());
    let conditions = response.get("conditions").cloned().filter(|v| !v.is_null());
    let explanation = response.get("explanation").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let now = Utc::now();

    let (state, resolution) = match resolution_field {
        Some("new_wins") => {
            store.bump_generalized_contradicted(MemoryKind::Semantic, &semantic.id)?;
            store.set_generalized_state(MemoryKind::Semantic, &semantic.id, MemoryState::Disputed)?;
            (
                ContradictionState::Resolved,
                Some(Resolution { verdict: ResolutionVerdict::BWins, conditions, explanation }),
            )
        }
        Some("existing_wins") => (
            ContradictionState::Resolved,
            Some(Resolution { verdict: ResolutionVerdict::AWins, conditions, explanation }),
        ),
        Some("context_dependent") => {
            store.set_generalized_state(MemoryKind::Semantic, &semantic.id, MemoryState::ContextDependent)?;
            if let Some(cond) = &conditions {
                store.set_generalized_conditions(MemoryKind::Semantic, &semantic.id, cond)?;
            }
            (
                ContradictionState::ContextDependent,
                Some(Resolution { verdict: ResolutionVerdict::ContextDependent, conditions, explanation }),
            )
        }
        _ => (ContradictionState::Open, None),
    };

    let contradiction = Contradiction {
        id: ids::new_id(),
        claim_a_id: semantic.id.clone(),
        claim_a_type: ClaimType::Semantic,
        claim_b_id: episode_id.to_string(),
        claim_b_type: ClaimType::Episode,
        resolved_at: resolution.is_some().then_some(now),
        state,
        resolution,
        reopened_at: None,
        reopen_evidence_id: None,
        created_at: now,
    };
    store.insert_contradiction(&contradiction)?;
    tracing::info!(contradiction_id = %contradiction.id, similarity, "contradiction recorded");
    Ok(ValidationOutcome::Contradiction { contradiction_id: contradiction.id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmProvider;
    use crate::types::GeneralizedMemory;

    fn store_with_semantic(embedding: Vec<f32>, content: &str) -> (tempfile::TempDir, Store, GeneralizedMemory) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Some(4)).unwrap();
        let memory = GeneralizedMemory {
            id: ids::new_id(),
            content: content.to_string(),
            embedding: Some(embedding),
            state: MemoryState::Active,
            conditions: None,
            evidence_episode_ids: vec![],
            evidence_count: 1,
            supporting_count: 1,
            contradicting_count: 0,
            source_type_diversity: 1,
            consolidation_checkpoint: None,
            embedding_model: "mock".into(),
            embedding_version: "1".into(),
            consolidation_model: None,
            consolidation_prompt_hash: None,
            created_at: Utc::now(),
            last_reinforced_at: None,
            retrieval_count: 0,
            challenge_count: 0,
        };
        store.insert_generalized(MemoryKind::Semantic, &memory).unwrap();
        (dir, store, memory)
    }

    #[tokio::test]
    async fn high_similarity_reinforces() {
        let (_dir, store, semantic) = store_with_semantic(vec![1.0, 0.0, 0.0, 0.0], "rate limit is 25 req/s");
        let outcome = validate(&store, "ep-1", "rate limit is 25 req/s", &[1.0, 0.0, 0.0, 0.0], Source::DirectObservation, None)
            .await
            .unwrap();
        assert_eq!(outcome, ValidationOutcome::Reinforced { semantic_id: semantic.id.clone() });
        let reloaded = store.get_generalized(MemoryKind::Semantic, &semantic.id).unwrap().unwrap();
        assert_eq!(reloaded.supporting_count, 2);
        assert!(reloaded.evidence_episode_ids.contains(&"ep-1".to_string()));
    }

    #[tokio::test]
    async fn mid_similarity_without_llm_is_none() {
        let (_dir, store, _semantic) = store_with_semantic(vec![1.0, 0.0, 0.0, 0.0], "rate limit is 25 req/s");
        // orthogonal-ish vector, cosine similarity not reaching the reinforcement threshold
        let outcome = validate(&store, "ep-1", "rate limit is 100 req/s", &[0.7, 0.7, 0.0, 0.0], Source::DirectObservation, None)
            .await
            .unwrap();
        assert_eq!(outcome, ValidationOutcome::None);
    }

    #[tokio::test]
    async fn contradiction_zone_with_llm_sets_context_dependent() {
        let (_dir, store, semantic) = store_with_semantic(vec![1.0, 0.0, 0.0, 0.0], "Rate limit is 25 req/s");
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new().with_response(
            "Rate limit is 100 req/s",
            serde_json::json!({
                "contradicts": true,
                "resolution": "context_dependent",
                "conditions": { "new": "live", "existing": "test" },
                "explanation": "modes differ"
            }),
        ));
        let outcome = validate(
            &store,
            "ep-1",
            "Rate limit is 100 req/s",
            &[0.7, 0.7, 0.0, 0.0],
            Source::DirectObservation,
            Some(&llm),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ValidationOutcome::Contradiction { .. }));
        let reloaded = store.get_generalized(MemoryKind::Semantic, &semantic.id).unwrap().unwrap();
        assert_eq!(reloaded.state, MemoryState::ContextDependent);
        assert!(reloaded.conditions.is_some());
    }
}
