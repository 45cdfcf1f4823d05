//! Episode clustering and principle promotion.
//!
//! Single-linkage union-find clustering over pairwise cosine similarity,
//! `O(N²)` by design and bounded in practice by the `min_cluster_size`
//! gate.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;

use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::Result;
use crate::ids;
use crate::llm::{LlmProvider, Message};
use crate::store::Store;
use crate::types::{Episode, GeneralizedMemory, MemoryKind, MemoryState, RunStatus};

pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 3;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.80;

/// A promoted principle, as produced by the caller's callback, the LLM
/// fallback, or the deterministic fallback.
#[derive(Debug, Clone)]
pub struct Principle {
    pub content: String,
    pub kind: MemoryKind,
    pub conditions: Option<serde_json::Value>,
}

/// Caller-supplied principle extraction, given the cluster's episodes.
pub type ExtractPrinciple = dyn Fn(&[Episode]) -> Principle + Send + Sync;

#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    pub min_cluster_size: Option<usize>,
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ConsolidateReport {
    pub run_id: String,
    pub episodes_evaluated: usize,
    pub clusters_found: usize,
    pub principles_extracted: usize,
    pub status: RunStatus,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Single-linkage clustering: for every pair with `sim ≥ threshold`, union
/// their components; return the surviving components (`len ≥
/// min_cluster_size`) as index lists into `episodes`.
fn cluster(episodes: &[Episode], threshold: f32, min_cluster_size: usize) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(episodes.len());
    for i in 0..episodes.len() {
        let Some(a) = &episodes[i].embedding else { continue };
        for j in (i + 1)..episodes.len() {
            let Some(b) = &episodes[j].embedding else { continue };
            if cosine_similarity(a, b) >= threshold {
                uf.union(i, j);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..episodes.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }

    groups.into_values().filter(|g| g.len() >= min_cluster_size).collect()
}

fn deterministic_principle(cluster_episodes: &[Episode]) -> Principle {
    let mut seen = BTreeSet::new();
    let mut parts = Vec::new();
    for episode in cluster_episodes {
        if seen.insert(episode.content.clone()) {
            parts.push(episode.content.clone());
        }
    }
    Principle {
        content: format!("Recurring pattern: {}", parts.join("; ")),
        kind: MemoryKind::Semantic,
        conditions: None,
    }
}

async fn extract_principle(
    cluster_episodes: &[Episode],
    callback: Option<&ExtractPrinciple>,
    llm: Option<&Arc<dyn LlmProvider>>,
) -> Result<Principle> {
    if let Some(callback) = callback {
        return Ok(callback(cluster_episodes));
    }

    if let Some(llm) = llm {
        let contents: Vec<&str> = cluster_episodes.iter().map(|e| e.content.as_str()).collect();
        let prompt = format!(
            "Extract one general principle from these recurring observations:\n{}\n\
             Respond as JSON: {{\"content\": string, \"type\": \"semantic\"|\"procedural\", \"conditions\": object|null}}",
            contents.join("\n"),
        );
        let response = llm.json(&[Message::user(prompt)]).await?;
        let content = response
            .get("content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| deterministic_principle(cluster_episodes).content);
        let kind = match response.get("type").and_then(|v| v.as_str()) {
            Some("procedural") => MemoryKind::Procedural,
            _ => MemoryKind::Semantic,
        };
        let conditions = response.get("conditions").cloned().filter(|v| !v.is_null());
        return Ok(Principle { content, kind, conditions });
    }

    Ok(deterministic_principle(cluster_episodes))
}

/// Clusters unconsolidated episodes and promotes each surviving cluster to
/// a generalized memory, recording the run as a rollback-able unit.
pub async fn consolidate(
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    llm: Option<&Arc<dyn LlmProvider>>,
    callback: Option<&ExtractPrinciple>,
    options: ConsolidateOptions,
) -> Result<ConsolidateReport> {
    let min_cluster_size = options.min_cluster_size.unwrap_or(DEFAULT_MIN_CLUSTER_SIZE);
    let similarity_threshold = options.similarity_threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);

    let run_id = ids::new_id();
    store.start_consolidation_run(&run_id, Utc::now())?;

    let result = run_pipeline(store, embedder, llm, callback, &run_id, min_cluster_size, similarity_threshold).await;

    match result {
        Ok((episodes_evaluated, clusters, promoted_memory_ids, input_episode_ids)) => {
            store.finish_consolidation_run(
                &run_id,
                RunStatus::Completed,
                &input_episode_ids,
                &promoted_memory_ids,
                Some(embedder.model_name()),
                None,
                Utc::now(),
            )?;
            tracing::info!(run_id = %run_id, episodes_evaluated, clusters_found = clusters, principles_extracted = promoted_memory_ids.len(), "consolidation completed");
            Ok(ConsolidateReport {
                run_id,
                episodes_evaluated,
                clusters_found: clusters,
                principles_extracted: promoted_memory_ids.len(),
                status: RunStatus::Completed,
            })
        }
        Err(error) => {
            store.finish_consolidation_run(&run_id, RunStatus::Failed, &[], &[], None, None, Utc::now())?;
            tracing::warn!(run_id = %run_id, error = %error, "consolidation failed");
            Err(error)
        }
    }
}

type PipelineOutput = (usize, usize, Vec<String>, Vec<String>);

async fn run_pipeline(
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    llm: Option<&Arc<dyn LlmProvider>>,
    callback: Option<&ExtractPrinciple>,
    run_id: &str,
    min_cluster_size: usize,
    similarity_threshold: f32,
) -> Result<PipelineOutput> {
    let episodes = store.unconsolidated_episodes()?;
    let episodes_evaluated = episodes.len();

    let clusters = cluster(&episodes, similarity_threshold, min_cluster_size);

    let mut promoted_memory_ids = Vec::new();
    let mut input_episode_ids = Vec::new();

    for indices in &clusters {
        let cluster_episodes: Vec<Episode> = indices.iter().map(|&i| episodes[i].clone()).collect();
        let principle = extract_principle(&cluster_episodes, callback, llm).await?;
        let embedding = embedder.embed(&principle.content).await?;

        let evidence_ids: Vec<String> = cluster_episodes.iter().map(|e| e.id.clone()).collect();
        let distinct_sources: BTreeSet<_> = cluster_episodes.iter().map(|e| e.source.as_str()).collect();

        let memory = GeneralizedMemory {
            id: ids::new_id(),
            content: principle.content,
            embedding: Some(embedding.clone()),
            state: MemoryState::Active,
            conditions: principle.conditions,
            evidence_count: evidence_ids.len() as u64,
            supporting_count: evidence_ids.len() as u64,
            contradicting_count: 0,
            source_type_diversity: distinct_sources.len().min(5) as u32,
            consolidation_checkpoint: Some(run_id.to_string()),
            embedding_model: embedder.model_name().to_string(),
            embedding_version: embedder.model_version().to_string(),
            consolidation_model: llm.map(|l| l.model_name().to_string()),
            consolidation_prompt_hash: None,
            created_at: Utc::now(),
            last_reinforced_at: None,
            retrieval_count: 0,
            challenge_count: 0,
            evidence_episode_ids: evidence_ids.clone(),
        };

        let memory_id = memory.id.clone();
        let kind = principle.kind;
        store.with_writer_transaction(|conn| {
            store.insert_generalized_tx(conn, kind, &memory)?;
            store.mark_episodes_consolidated(conn, &evidence_ids)?;
            Ok(())
        })?;
        store.sync_vector_index(kind, &memory_id, &embedding)?;

        promoted_memory_ids.push(memory_id);
        input_episode_ids.extend(evidence_ids);
    }

    Ok((episodes_evaluated, clusters.len(), promoted_memory_ids, input_episode_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::encoder::{build_episode, encode_one, EncodeRequest};
    use crate::types::Source;

    async fn setup() -> (tempfile::TempDir, Store, Arc<dyn EmbeddingProvider>) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(16));
        let store = Store::open(dir.path(), Some(16)).unwrap();
        (dir, store, embedder)
    }

    async fn seed_episode(store: &Store, embedder: &Arc<dyn EmbeddingProvider>, content: &str, source: Source) -> Episode {
        let request = EncodeRequest::new(content, source);
        let embedding = embedder.embed(content).await.unwrap();
        let episode = build_episode(&request, embedding, embedder.model_name(), embedder.model_version());
        encode_one(store, &episode).unwrap();
        episode
    }

    #[tokio::test]
    async fn stripe_learning_scenario_produces_one_semantic() {
        let (_dir, store, embedder) = setup().await;
        seed_episode(&store, &embedder, "Stripe API returned 429", Source::DirectObservation).await;
        seed_episode(&store, &embedder, "Stripe API returned 429", Source::ToolResult).await;
        seed_episode(&store, &embedder, "Stripe API returned 429", Source::ToldByUser).await;

        let callback: Box<ExtractPrinciple> = Box::new(|_episodes| Principle {
            content: "Throttle at 100 req/s".to_string(),
            kind: MemoryKind::Semantic,
            conditions: None,
        });

        let report = consolidate(
            &store,
            &embedder,
            None,
            Some(&*callback),
            ConsolidateOptions { min_cluster_size: Some(3), similarity_threshold: Some(0.99) },
        )
        .await
        .unwrap();

        assert_eq!(report.clusters_found, 1);
        assert_eq!(report.principles_extracted, 1);
        assert_eq!(report.status, RunStatus::Completed);

        let semantics = store.all_in_state(MemoryKind::Semantic, MemoryState::Active).unwrap();
        assert_eq!(semantics.len(), 1);
        assert_eq!(semantics[0].source_type_diversity, 3);
        assert_eq!(semantics[0].evidence_count, 3);
        assert_eq!(semantics[0].evidence_episode_ids.len(), 3);
        assert_eq!(semantics[0].consolidation_checkpoint, Some(report.run_id.clone()));

        assert_eq!(store.count_episodes().unwrap(), 3);
    }

    #[tokio::test]
    async fn rerunning_with_no_new_episodes_finds_nothing() {
        let (_dir, store, embedder) = setup().await;
        seed_episode(&store, &embedder, "Stripe API returned 429", Source::DirectObservation).await;
        seed_episode(&store, &embedder, "Stripe API returned 429", Source::ToolResult).await;
        seed_episode(&store, &embedder, "Stripe API returned 429", Source::ToldByUser).await;

        consolidate(&store, &embedder, None, None, ConsolidateOptions { min_cluster_size: Some(3), similarity_threshold: Some(0.99) })
            .await
            .unwrap();

        let second = consolidate(&store, &embedder, None, None, ConsolidateOptions { min_cluster_size: Some(3), similarity_threshold: Some(0.99) })
            .await
            .unwrap();
        assert_eq!(second.clusters_found, 0);
        assert_eq!(second.principles_extracted, 0);
    }

    #[tokio::test]
    async fn clusters_below_minimum_size_are_discarded() {
        let (_dir, store, embedder) = setup().await;
        seed_episode(&store, &embedder, "a rare one-off event", Source::DirectObservation).await;

        let report = consolidate(&store, &embedder, None, None, ConsolidateOptions::default()).await.unwrap();
        assert_eq!(report.clusters_found, 0);
    }
}
