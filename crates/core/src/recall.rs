//! Multi-type ranked retrieval.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::confidence::{confidence, ConfidenceInputs, MemoryHalfLife};
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::store::{EpisodeFilter, Store};
use crate::types::{MemoryKind, MemoryState, RecallEntry, RecallType, Source};

/// Memory types a query may be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Episodic,
    Semantic,
    Procedural,
}

#[derive(Debug, Clone)]
pub struct RecallRequest {
    pub query: String,
    pub limit: usize,
    pub types: BTreeSet<QueryType>,
    pub min_confidence: f64,
    pub include_provenance: bool,
    pub include_dormant: bool,
}

impl Default for RecallRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 10,
            types: [QueryType::Episodic, QueryType::Semantic, QueryType::Procedural].into_iter().collect(),
            min_confidence: 0.0,
            include_provenance: false,
            include_dormant: false,
        }
    }
}

impl RecallRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }
}

/// Scores, ranks, and merges across the requested memory types, given an
/// already-computed query embedding. Embedding the query is the caller's
/// job since it is async.
pub fn recall_with_embedding(store: &Store, request: &RecallRequest, query_embedding: &[f32]) -> Result<Vec<RecallEntry>> {
    let now = Utc::now();
    let k = request.limit.saturating_mul(3).max(1);
    let mut entries = Vec::new();

    if request.types.contains(&QueryType::Episodic) {
        let hits = store.knn_episodes(query_embedding, k, &EpisodeFilter { source: None, not_superseded: true })?;
        for (episode, similarity) in hits {
            let age_days = (now - episode.created_at).num_seconds() as f64 / 86_400.0;
            let c = confidence(ConfidenceInputs {
                source: episode.source,
                support: 0.0,
                contradict: 0.0,
                age_days,
                half_life_days: MemoryHalfLife::Episodic.days(),
                retrieval_count: 0,
                days_since_retrieval: age_days,
            });
            if c < request.min_confidence {
                continue;
            }
            entries.push(RecallEntry {
                id: episode.id,
                content: episode.content,
                memory_type: RecallType::Episodic,
                confidence: c,
                score: similarity as f64 * c,
                source: episode.source.as_str().to_string(),
                created_at: episode.created_at,
                state: None,
                provenance: request.include_provenance.then(|| {
                    serde_json::json!({ "supersedes": episode.supersedes, "superseded_by": episode.superseded_by })
                }),
            });
        }
    }

    for (query_type, kind, half_life) in [
        (QueryType::Semantic, MemoryKind::Semantic, MemoryHalfLife::Semantic),
        (QueryType::Procedural, MemoryKind::Procedural, MemoryHalfLife::Procedural),
    ] {
        if !request.types.contains(&query_type) {
            continue;
        }

        let mut allowed_states = vec![MemoryState::Active, MemoryState::ContextDependent];
        if request.include_dormant {
            allowed_states.push(MemoryState::Dormant);
        }

        let hits = store.knn_generalized(kind, query_embedding, k, &allowed_states)?;
        for (memory, similarity) in hits {
            let age_days = (now - memory.created_at).num_seconds() as f64 / 86_400.0;
            let last_touch = memory.last_reinforced_at.unwrap_or(memory.created_at);
            let days_since_retrieval = (now - last_touch).num_seconds() as f64 / 86_400.0;
            let c = confidence(ConfidenceInputs {
                source: Source::ToolResult,
                support: memory.supporting_count as f64,
                contradict: memory.contradicting_count as f64,
                age_days,
                half_life_days: half_life.days(),
                retrieval_count: memory.retrieval_count,
                days_since_retrieval,
            });
            if c < request.min_confidence {
                continue;
            }

            store.bump_retrieval(kind, &memory.id, now)?;

            let memory_type = match query_type {
                QueryType::Semantic => RecallType::Semantic,
                QueryType::Procedural => RecallType::Procedural,
                QueryType::Episodic => unreachable!(),
            };
            entries.push(RecallEntry {
                id: memory.id,
                content: memory.content,
                memory_type,
                confidence: c,
                score: similarity as f64 * c,
                source: Source::ToolResult.as_str().to_string(),
                created_at: memory.created_at,
                state: Some(memory.state),
                provenance: request.include_provenance.then(|| {
                    serde_json::json!({ "evidence_episode_ids": memory.evidence_episode_ids, "conditions": memory.conditions })
                }),
            });
        }
    }

    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    entries.truncate(request.limit);
    Ok(entries)
}

/// Async convenience wrapper that embeds the query and delegates to
/// [`recall_with_embedding`].
pub async fn recall(store: &Store, embedder: &Arc<dyn EmbeddingProvider>, request: &RecallRequest) -> Result<Vec<RecallEntry>> {
    let query_embedding = embedder.embed(&request.query).await?;
    recall_with_embedding(store, request, &query_embedding)
}

/// Lazily yields the same ordered prefix `recall` would produce — an
/// adapter over the same scoring path, not a second implementation.
/// Early-termination safe: dropping the iterator after `n` items costs no
/// more than computing exactly those `n`.
pub fn recall_stream_with_embedding(
    store: &Store,
    request: &RecallRequest,
    query_embedding: &[f32],
) -> Result<impl Iterator<Item = RecallEntry>> {
    Ok(recall_with_embedding(store, request, query_embedding)?.into_iter())
}
