//! Whole-`Brain` scenario journeys: encode/consolidate, rollback,
//! contradiction detection, decay, recall ordering, and dimension pinning.

use std::sync::Arc;
use std::time::Duration;

use engram_core::{
    Brain, Config, ConsolidateOptions, CoreError, EncodeRequest, MockEmbeddingProvider, MockLlmProvider, Principle,
    QueryType, RecallRequest,
};
use engram_core::types::{MemoryKind, RunStatus, Source};
use engram_e2e_tests::harness::TestBrain;
use engram_e2e_tests::mocks::{FixedVectorEmbeddingProvider, TestDataFactory};

async fn recv_matching<F>(receiver: &mut tokio::sync::broadcast::Receiver<engram_core::Event>, mut matches: F) -> engram_core::Event
where
    F: FnMut(&engram_core::Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = receiver.recv().await.expect("event channel closed before a match arrived");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for the expected event")
}

/// S1 — encoding three corroborating episodes and consolidating them into
/// one semantic memory with full source diversity.
#[tokio::test]
async fn stripe_learning_consolidates_into_one_semantic() {
    let test_brain = TestBrain::new().await;
    let brain = &test_brain.brain;

    for source in [Source::DirectObservation, Source::ToolResult, Source::ToldByUser] {
        brain.encode(EncodeRequest::new("Stripe API returned 429", source)).await.unwrap();
    }

    let options = ConsolidateOptions { min_cluster_size: Some(3), similarity_threshold: Some(0.99) };
    let callback = |_episodes: &[engram_core::types::Episode]| Principle {
        content: "Throttle at 100 req/s".to_string(),
        kind: MemoryKind::Semantic,
        conditions: None,
    };
    let report = brain.consolidate(options, Some(&callback)).await.unwrap();

    assert_eq!(report.clusters_found, 1);
    assert_eq!(report.principles_extracted, 1);
    assert_eq!(report.status, RunStatus::Completed);

    let history = brain.consolidation_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].input_episode_ids.len(), 3);
    assert_eq!(history[0].output_memory_ids.len(), 1);

    let report = brain.introspect().unwrap();
    assert_eq!(report.total_episodes, 3);
    assert_eq!(report.active_semantics, 1);

    let hits = brain
        .recall(RecallRequest { types: [QueryType::Semantic].into_iter().collect(), include_provenance: true, ..RecallRequest::new("Throttle at 100 req/s") })
        .await
        .unwrap();
    let semantic = hits.into_iter().find(|h| h.content == "Throttle at 100 req/s").expect("promoted semantic not found");
    let provenance = semantic.provenance.expect("provenance requested");
    assert_eq!(provenance["evidence_episode_ids"].as_array().unwrap().len(), 3);
}

/// S2 — rolling back a completed consolidation run undoes the promotion
/// and restores the input episodes to unconsolidated.
#[tokio::test]
async fn rollback_undoes_a_completed_consolidation() {
    let test_brain = TestBrain::new().await;
    let brain = &test_brain.brain;

    for source in [Source::DirectObservation, Source::ToolResult, Source::ToldByUser] {
        brain.encode(EncodeRequest::new("Stripe API returned 429", source)).await.unwrap();
    }
    let options = ConsolidateOptions { min_cluster_size: Some(3), similarity_threshold: Some(0.99) };
    let callback = |_episodes: &[engram_core::types::Episode]| Principle {
        content: "Throttle at 100 req/s".to_string(),
        kind: MemoryKind::Semantic,
        conditions: None,
    };
    let consolidate_report = brain.consolidate(options, Some(&callback)).await.unwrap();

    let rollback_report = brain.rollback(&consolidate_report.run_id).await.unwrap();
    assert_eq!(rollback_report.rolled_back_memories, 1);
    assert_eq!(rollback_report.restored_episodes, 3);

    let history = brain.consolidation_history().unwrap();
    assert_eq!(history[0].status, RunStatus::RolledBack);

    let report = brain.introspect().unwrap();
    assert_eq!(report.active_semantics, 0);
}

/// S3 — a new episode landing in the contradiction-similarity band against
/// an existing semantic, with the LLM resolving it as context-dependent.
#[tokio::test]
async fn contradicting_episode_opens_a_context_dependent_contradiction() {
    let embedder = FixedVectorEmbeddingProvider::new(4)
        .with("Rate limit is 25 req/s", vec![1.0, 0.0, 0.0, 0.0])
        .with("Rate limit is 100 req/s", vec![0.7, 0.7, 0.0, 0.0]);
    let llm = MockLlmProvider::new().with_response(
        "Rate limit is 100 req/s",
        serde_json::json!({
            "contradicts": true,
            "resolution": "context_dependent",
            "conditions": { "new": "live", "existing": "test" },
            "explanation": "modes differ"
        }),
    );
    let test_brain = TestBrain::custom(Arc::new(embedder), Some(Arc::new(llm))).await;
    let brain = &test_brain.brain;

    for source in [Source::DirectObservation, Source::ToolResult, Source::ToldByUser] {
        brain.encode(EncodeRequest::new("Rate limit is 25 req/s", source)).await.unwrap();
    }
    let options = ConsolidateOptions { min_cluster_size: Some(3), similarity_threshold: Some(0.99) };
    let callback = |_episodes: &[engram_core::types::Episode]| Principle {
        content: "Rate limit is 25 req/s".to_string(),
        kind: MemoryKind::Semantic,
        conditions: None,
    };
    brain.consolidate(options, Some(&callback)).await.unwrap();

    let mut events = brain.subscribe();
    brain.encode(EncodeRequest::new("Rate limit is 100 req/s", Source::DirectObservation)).await.unwrap();

    let event = recv_matching(&mut events, |e| matches!(e, engram_core::Event::Contradiction { .. })).await;
    let engram_core::Event::Contradiction { contradiction_id } = event else { unreachable!() };
    assert!(!contradiction_id.is_empty());
}

/// S4 — an old, contradicted, never-retrieved semantic transitions to
/// dormant once its confidence drops below the decay threshold.
#[tokio::test]
async fn old_unsupported_semantic_decays_to_dormant() {
    let dir = tempfile::tempdir().unwrap();
    let store = engram_core::store::Store::open(dir.path(), Some(4)).unwrap();
    let memory = TestDataFactory::seed_semantic(&store, "old unsupported claim", vec![1.0, 0.0, 0.0, 0.0], 0, 3, 120);

    let report = engram_core::decay::decay(&store, Some(0.3)).unwrap();
    assert!(report.transitioned_to_dormant >= 1);

    let reloaded = store.get_generalized(MemoryKind::Semantic, &memory.id).unwrap().unwrap();
    assert_eq!(reloaded.state, engram_core::types::MemoryState::Dormant);
}

/// S5 — two semantics with identical similarity to the query but different
/// confidence are returned with the higher-confidence one first.
#[tokio::test]
async fn higher_confidence_semantic_outranks_equally_similar_weaker_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = engram_core::store::Store::open(dir.path(), Some(4)).unwrap();
    let strong = TestDataFactory::seed_semantic(&store, "strong claim", vec![1.0, 0.0, 0.0, 0.0], 20, 0, 0);
    let _weak = TestDataFactory::seed_semantic(&store, "weak claim", vec![1.0, 0.0, 0.0, 0.0], 1, 3, 0);

    let request = RecallRequest::new("x");
    let hits = engram_core::recall::recall_with_embedding(&store, &request, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(hits[0].id, strong.id);
}

/// S6 — reopening a store with a different dimension than it was first
/// pinned with is a fatal, non-mutating error.
#[tokio::test]
async fn reopening_with_a_different_dimension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    {
        let embedder: Arc<dyn engram_core::EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(64));
        let brain = Brain::open(Config::new(dir.path(), "test-agent", embedder)).await.unwrap();
        brain.close().await;
    }

    let embedder: Arc<dyn engram_core::EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(128));
    let mut config = Config::new(dir.path(), "test-agent", embedder);
    config.dimensions = Some(128);
    let result = Brain::open(config).await;
    assert!(matches!(result, Err(CoreError::DimensionMismatch { stored: 64, requested: 128 })));

    // Reopening with the originally pinned dimension still succeeds and the
    // store is untouched by the failed attempt.
    let embedder: Arc<dyn engram_core::EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(64));
    let brain = Brain::open(Config::new(dir.path(), "test-agent", embedder)).await.unwrap();
    let report = brain.introspect().unwrap();
    assert_eq!(report.total_episodes, 0);
}
