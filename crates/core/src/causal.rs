//! Causal links.
//!
//! Insertion with an optional LLM mechanism-articulation step (which may
//! classify the link as `spurious` and veto the insert), plus a
//! cycle-guarded bounded BFS traversal.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::ids;
use crate::llm::{LlmProvider, Message};
use crate::store::Store;
use crate::types::{CausalLink, LinkType};

pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone)]
pub struct CausalLinkRequest {
    pub cause_id: String,
    pub effect_id: String,
    pub link_type: LinkType,
    pub mechanism: Option<String>,
    pub confidence: f64,
}

/// Insert a causal link. If `llm` is supplied, its mechanism articulation
/// may classify the relation as `spurious`, in which case nothing is
/// inserted and `Ok(None)` is returned.
pub async fn insert_causal_link(store: &Store, llm: Option<&Arc<dyn LlmProvider>>, request: CausalLinkRequest) -> Result<Option<CausalLink>> {
    let mechanism = if let Some(provided) = request.mechanism {
        provided
    } else if let Some(llm) = llm {
        let prompt = format!(
            "Articulate the causal mechanism, if any, between these two observations.\n\
             Cause: {}\nEffect: {}\n\
             Respond as JSON: {{\"mechanism\": string, \"spurious\": bool}}",
            request.cause_id, request.effect_id,
        );
        let response = llm.json(&[Message::user(prompt)]).await?;
        if response.get("spurious").and_then(|v| v.as_bool()).unwrap_or(false) {
            tracing::info!(cause_id = %request.cause_id, effect_id = %request.effect_id, "causal link classified as spurious, not inserted");
            return Ok(None);
        }
        response.get("mechanism").and_then(|v| v.as_str()).unwrap_or_default().to_string()
    } else {
        String::new()
    };

    let link = CausalLink {
        id: ids::new_id(),
        cause_id: request.cause_id,
        effect_id: request.effect_id,
        link_type: request.link_type,
        mechanism,
        confidence: request.confidence,
        evidence_count: 1,
        created_at: Utc::now(),
    };
    store.insert_causal_link(&link)?;
    Ok(Some(link))
}

/// Bounded breadth-first traversal over `cause → effect` edges starting at
/// `start_id`, cycle-guarded by a visited set, at most `max_depth` hops.
/// Returns the ordered list of traversed edges.
pub fn traverse(store: &Store, start_id: &str, max_depth: Option<usize>) -> Result<Vec<CausalLink>> {
    let max_depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let mut visited: HashSet<String> = HashSet::from([start_id.to_string()]);
    let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start_id.to_string(), 0)]);
    let mut edges = Vec::new();

    while let Some((current_id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for link in store.causal_links_from(&current_id)? {
            if visited.contains(&link.effect_id) {
                continue;
            }
            visited.insert(link.effect_id.clone());
            queue.push_back((link.effect_id.clone(), depth + 1));
            edges.push(link);
        }
    }

    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Some(4)).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn insert_without_llm_stores_the_link() {
        let (_dir, store) = store();
        let link = insert_causal_link(
            &store,
            None,
            CausalLinkRequest {
                cause_id: "a".into(),
                effect_id: "b".into(),
                link_type: LinkType::Causal,
                mechanism: Some("direct".into()),
                confidence: 0.8,
            },
        )
        .await
        .unwrap();
        assert!(link.is_some());
    }

    #[test]
    fn traversal_is_cycle_guarded() {
        let (_dir, store) = store();
        store
            .insert_causal_link(&CausalLink {
                id: ids::new_id(),
                cause_id: "a".into(),
                effect_id: "b".into(),
                link_type: LinkType::Causal,
                mechanism: String::new(),
                confidence: 0.5,
                evidence_count: 1,
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .insert_causal_link(&CausalLink {
                id: ids::new_id(),
                cause_id: "b".into(),
                effect_id: "a".into(),
                link_type: LinkType::Causal,
                mechanism: String::new(),
                confidence: 0.5,
                evidence_count: 1,
                created_at: Utc::now(),
            })
            .unwrap();

        let edges = traverse(&store, "a", None).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn traversal_respects_max_depth() {
        let (_dir, store) = store();
        for (cause, effect) in [("a", "b"), ("b", "c"), ("c", "d")] {
            store
                .insert_causal_link(&CausalLink {
                    id: ids::new_id(),
                    cause_id: cause.into(),
                    effect_id: effect.into(),
                    link_type: LinkType::Causal,
                    mechanism: String::new(),
                    confidence: 0.5,
                    evidence_count: 1,
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let edges = traverse(&store, "a", Some(1)).unwrap();
        assert_eq!(edges.len(), 1);
    }
}
