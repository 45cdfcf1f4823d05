//! Truth Resolver.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{CoreError, Result};
use crate::llm::{LlmProvider, Message};
use crate::store::Store;
use crate::types::{ClaimType, Contradiction, ContradictionState, MemoryKind, MemoryState, Resolution, ResolutionVerdict};

fn claim_content(store: &Store, id: &str, claim_type: ClaimType) -> Result<String> {
    match claim_type {
        ClaimType::Episode => store
            .get_episode(id)?
            .map(|e| e.content)
            .ok_or_else(|| CoreError::NotFound(format!("episode claim {id} not found"))),
        ClaimType::Semantic => store
            .get_generalized(MemoryKind::Semantic, id)?
            .map(|m| m.content)
            .ok_or_else(|| CoreError::NotFound(format!("semantic claim {id} not found"))),
        ClaimType::Procedural => store
            .get_generalized(MemoryKind::Procedural, id)?
            .map(|m| m.content)
            .ok_or_else(|| CoreError::NotFound(format!("procedural claim {id} not found"))),
    }
}

/// Load both claims, ask the LLM to resolve, apply the resulting state
/// transitions to whichever claim is a semantic/procedure.
pub async fn resolve_truth(store: &Store, llm: Option<&Arc<dyn LlmProvider>>, contradiction_id: &str) -> Result<Contradiction> {
    let llm = llm.ok_or_else(|| CoreError::MissingCapability("truth resolution requires an LLM adapter".into()))?;

    let mut contradiction = store
        .get_contradiction(contradiction_id)?
        .ok_or_else(|| CoreError::NotFound(format!("contradiction {contradiction_id} not found")))?;

    let content_a = claim_content(store, &contradiction.claim_a_id, contradiction.claim_a_type)?;
    let content_b = claim_content(store, &contradiction.claim_b_id, contradiction.claim_b_type)?;

    let prompt = format!(
        "Resolve this contradiction between two claims.\nClaim A: {content_a}\nClaim B: {content_b}\n\
         Respond as JSON: {{\"resolution\": \"a_wins\"|\"b_wins\"|\"context_dependent\", \
         \"conditions\": object|null, \"explanation\": string}}"
    );
    let response = llm.json(&[Message::user(prompt)]).await?;

    let verdict = response
        .get("resolution")
        .and_then(|v| v.as_str())
        .and_then(ResolutionVerdict::parse)
        .ok_or_else(|| CoreError::Adapter("truth resolver LLM returned an unparseable resolution".into()))?;
    let conditions = response.get("conditions").cloned().filter(|v| !v.is_null());
    let explanation = response.get("explanation").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let now = Utc::now();
    let state = if matches!(verdict, ResolutionVerdict::ContextDependent) {
        ContradictionState::ContextDependent
    } else {
        ContradictionState::Resolved
    };

    match verdict {
        ResolutionVerdict::AWins => {
            if contradiction.claim_a_type == ClaimType::Semantic {
                store.set_generalized_state(MemoryKind::Semantic, &contradiction.claim_a_id, MemoryState::Active)?;
            } else if contradiction.claim_a_type == ClaimType::Procedural {
                store.set_generalized_state(MemoryKind::Procedural, &contradiction.claim_a_id, MemoryState::Active)?;
            }
        }
        ResolutionVerdict::BWins => {
            if contradiction.claim_b_type == ClaimType::Semantic {
                store.set_generalized_state(MemoryKind::Semantic, &contradiction.claim_b_id, MemoryState::Active)?;
            } else if contradiction.claim_b_type == ClaimType::Procedural {
                store.set_generalized_state(MemoryKind::Procedural, &contradiction.claim_b_id, MemoryState::Active)?;
            }
        }
        ResolutionVerdict::ContextDependent => {
            if contradiction.claim_a_type == ClaimType::Semantic {
                store.set_generalized_state(MemoryKind::Semantic, &contradiction.claim_a_id, MemoryState::ContextDependent)?;
                if let Some(cond) = &conditions {
                    store.set_generalized_conditions(MemoryKind::Semantic, &contradiction.claim_a_id, cond)?;
                }
            } else if contradiction.claim_a_type == ClaimType::Procedural {
                store.set_generalized_state(MemoryKind::Procedural, &contradiction.claim_a_id, MemoryState::ContextDependent)?;
            }
        }
    }

    let resolution = Resolution { verdict, conditions, explanation };
    store.resolve_contradiction(contradiction_id, state, &resolution, now)?;

    contradiction.state = state;
    contradiction.resolution = Some(resolution);
    contradiction.resolved_at = Some(now);
    tracing::info!(contradiction_id, ?state, "contradiction resolved");
    Ok(contradiction)
}
