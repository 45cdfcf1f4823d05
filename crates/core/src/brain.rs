//! The Brain façade.
//!
//! Owns the Store, the embedding adapter, and the optional LLM adapter;
//! orchestrates every other component behind one public operation set. The
//! façade is the crate's only async boundary: every other module is
//! synchronous `rusqlite`/pure-function code, bridged here with
//! `tokio::task::spawn_blocking` the way a sync storage layer is
//! conventionally wrapped for an async caller.
//!
//! Post-encode validation is fired as a detached `tokio::task::spawn` once
//! `encode`'s own transaction has committed; its outcome (or failure) is
//! published on the same [`Event`] broadcast channel the rest of the façade
//! uses, rather than a second channel — `Event::Error` already exists for
//! exactly this case, and a caller who wants failures only can filter the
//! stream for that variant.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tokio::sync::broadcast;

use crate::causal::{self, CausalLinkRequest};
use crate::confidence::ConfidenceInputs;
use crate::consolidator::{self, ConsolidateOptions, ConsolidateReport, ExtractPrinciple};
use crate::decay::{self, DecayReport};
use crate::embeddings::EmbeddingProvider;
use crate::encoder::{self, EncodeRequest};
use crate::error::{CoreError, Result};
use crate::events::{Event, EVENT_CHANNEL_CAPACITY};
use crate::introspect::{self, IntrospectReport};
use crate::llm::LlmProvider;
use crate::recall::{self, RecallRequest};
use crate::rollback::{self, RollbackReport};
use crate::store::Store;
use crate::truth;
use crate::types::{CausalLink, ConsolidationRun, Contradiction, Episode, LinkType, RecallEntry};
use crate::validator;

/// Configuration recognized by the core. `embedding`/`llm` carry
/// already-constructed adapters rather than a provider-name string: the
/// core takes capability objects at construction, it does not resolve
/// providers itself.
#[derive(Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Used for logging only — attached as a `tracing` field on every span
    /// the façade opens.
    pub agent: String,
    /// Pins the store's vector dimensionality on first open. When `None`,
    /// falls back to `embedding.dimensions()`.
    pub dimensions: Option<usize>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub consolidation_min_episodes: usize,
    pub decay_dormant_threshold: f64,
    /// Capacity of the recall query-embedding cache. Repeated identical
    /// queries skip re-embedding; set to `0` to disable caching entirely.
    pub query_cache_size: usize,
}

const DEFAULT_QUERY_CACHE_SIZE: usize = 256;

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>, agent: impl Into<String>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            data_dir: data_dir.into(),
            agent: agent.into(),
            dimensions: None,
            embedding,
            llm: None,
            consolidation_min_episodes: consolidator::DEFAULT_MIN_CLUSTER_SIZE,
            decay_dormant_threshold: decay::DEFAULT_DORMANT_THRESHOLD,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Same as [`Config::new`] but resolves `data_dir` to the platform data
    /// directory for `(qualifier, organization, application)` instead of
    /// taking an explicit path.
    pub fn with_default_data_dir(
        qualifier: &str,
        organization: &str,
        application: &str,
        agent: impl Into<String>,
        embedding: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let project_dirs = directories::ProjectDirs::from(qualifier, organization, application)
            .ok_or_else(|| CoreError::Adapter("could not determine platform data directory".into()))?;
        Ok(Self::new(project_dirs.data_dir(), agent, embedding))
    }
}

/// Orchestrates the Store, the embedding adapter, and the optional LLM
/// adapter behind the crate's public operation set.
pub struct Brain {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    agent: String,
    consolidation_min_episodes: usize,
    decay_dormant_threshold: f64,
    events: broadcast::Sender<Event>,
    query_cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl Brain {
    /// Bootstraps the Store at `config.data_dir`, pinning dimensions from
    /// `config.dimensions` or the embedder's own.
    pub async fn open(config: Config) -> Result<Self> {
        let dimensions = config.dimensions.unwrap_or_else(|| config.embedding.dimensions());
        let data_dir: PathBuf = config.data_dir.clone();
        let store = tokio::task::spawn_blocking(move || Store::open(&data_dir, Some(dimensions)))
            .await
            .map_err(|e| CoreError::Adapter(format!("blocking task failed: {e}")))??;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(agent = %config.agent, dimensions, "brain opened");

        let query_cache = NonZeroUsize::new(config.query_cache_size).map(|cap| Mutex::new(LruCache::new(cap)));

        Ok(Self {
            store: Arc::new(store),
            embedder: config.embedding,
            llm: config.llm,
            agent: config.agent,
            consolidation_min_episodes: config.consolidation_min_episodes,
            decay_dormant_threshold: config.decay_dormant_threshold,
            events,
            query_cache,
        })
    }

    /// Returns the cached embedding for `query` if present, otherwise embeds
    /// it and populates the cache. No-op passthrough when caching is
    /// disabled (`query_cache_size == 0`).
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let Some(cache) = &self.query_cache else {
            return self.embedder.embed(query).await;
        };

        if let Some(hit) = cache.lock().expect("query cache lock poisoned").get(query).cloned() {
            return Ok(hit);
        }

        let embedding = self.embedder.embed(query).await?;
        cache.lock().expect("query cache lock poisoned").put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Subscribe to the façade's lifecycle event stream.
    /// Events published before a receiver subscribes are lost, matching
    /// `tokio::sync::broadcast`'s normal semantics; subscribe before the
    /// operation you want to observe.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // No receivers is not an error: the façade runs headless in tests
        // and in any caller that doesn't care about the event stream.
        let _ = self.events.send(event);
    }

    /// Validate, embed, persist, then fire the Validator as a detached
    /// task. Returns as soon as the episode itself
    /// is committed — the detached task's outcome is published on
    /// [`Brain::subscribe`], never on this call's `Result`.
    pub async fn encode(&self, request: EncodeRequest) -> Result<String> {
        encoder::validate_request(&self.store, &request)?;

        let embedding = self.embedder.embed(&request.content).await?;
        let episode = encoder::build_episode(&request, embedding, self.embedder.model_name(), self.embedder.model_version());
        let episode_id = episode.id.clone();

        let store = Arc::clone(&self.store);
        let episode_for_write = episode.clone();
        tokio::task::spawn_blocking(move || encoder::encode_one(&store, &episode_for_write))
            .await
            .map_err(|e| CoreError::Adapter(format!("blocking task failed: {e}")))??;

        tracing::info!(agent = %self.agent, episode_id = %episode_id, "episode encoded");
        self.emit(Event::Encode { episode_id: episode_id.clone() });

        self.spawn_validation(episode);

        Ok(episode_id)
    }

    /// Same ordering as the input list. Each episode's detached Validator
    /// is spawned as soon as that episode commits; validators may
    /// interleave across episodes, so this does not wait for one
    /// validator before starting the next episode's encode.
    pub async fn encode_batch(&self, requests: Vec<EncodeRequest>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            ids.push(self.encode(request).await?);
        }
        Ok(ids)
    }

    fn spawn_validation(&self, episode: Episode) {
        let store = Arc::clone(&self.store);
        let llm = self.llm.clone();
        let events = self.events.clone();
        let Some(embedding) = episode.embedding.clone() else {
            return;
        };

        tokio::task::spawn(async move {
            let outcome = validator::validate(&store, &episode.id, &episode.content, &embedding, episode.source, llm.as_ref()).await;
            match outcome {
                Ok(outcome) => {
                    if let Some(event) = Event::from_validation_outcome(&outcome) {
                        let _ = events.send(event);
                    }
                }
                Err(error) => {
                    tracing::warn!(episode_id = %episode.id, error = %error, "async validation failed");
                    let _ = events.send(Event::error(&error));
                }
            }
        });
    }

    /// Embeds the query (served from the query cache on a repeat), then
    /// scores/ranks/merges across the requested memory types,
    /// retrieval-reinforcing every matched semantic/procedural row.
    pub async fn recall(&self, request: RecallRequest) -> Result<Vec<RecallEntry>> {
        let query_embedding = self.embed_query(&request.query).await?;
        recall::recall_with_embedding(&self.store, &request, &query_embedding)
    }

    /// Same ordered prefix as `recall`, yielded lazily. Early-termination
    /// safe.
    pub async fn recall_stream(&self, request: RecallRequest) -> Result<impl Iterator<Item = RecallEntry> + use<>> {
        let query_embedding = self.embed_query(&request.query).await?;
        recall::recall_stream_with_embedding(&self.store, &request, &query_embedding)
    }

    /// Clusters unconsolidated episodes and promotes recurring ones into
    /// generalized memories.
    pub async fn consolidate(&self, mut options: ConsolidateOptions, callback: Option<&ExtractPrinciple>) -> Result<ConsolidateReport> {
        if options.min_cluster_size.is_none() {
            options.min_cluster_size = Some(self.consolidation_min_episodes);
        }
        let report = consolidator::consolidate(&self.store, &self.embedder, self.llm.as_ref(), callback, options).await?;
        self.emit(Event::Consolidation {
            run_id: report.run_id.clone(),
            clusters_found: report.clusters_found,
            principles_extracted: report.principles_extracted,
        });
        Ok(report)
    }

    /// Transitions low-confidence active memories to dormant.
    pub async fn decay(&self, dormant_threshold: Option<f64>) -> Result<DecayReport> {
        let threshold = dormant_threshold.unwrap_or(self.decay_dormant_threshold);
        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || decay::decay(&store, Some(threshold)))
            .await
            .map_err(|e| CoreError::Adapter(format!("blocking task failed: {e}")))??;
        self.emit(Event::Decay { transitioned_to_dormant: report.transitioned_to_dormant });
        Ok(report)
    }

    /// Undoes a completed consolidation run.
    pub async fn rollback(&self, run_id: &str) -> Result<RollbackReport> {
        let store = Arc::clone(&self.store);
        let run_id_owned = run_id.to_string();
        let report = tokio::task::spawn_blocking(move || rollback::rollback(&store, &run_id_owned))
            .await
            .map_err(|e| CoreError::Adapter(format!("blocking task failed: {e}")))??;
        self.emit(Event::Rollback { run_id: run_id.to_string(), rolled_back_memories: report.rolled_back_memories });
        Ok(report)
    }

    /// Resolves an open contradiction via the LLM-backed Truth Resolver.
    pub async fn resolve_truth(&self, contradiction_id: &str) -> Result<Contradiction> {
        truth::resolve_truth(&self.store, self.llm.as_ref(), contradiction_id).await
    }

    /// Aggregate counters over the whole store.
    pub fn introspect(&self) -> Result<IntrospectReport> {
        introspect::introspect(&self.store)
    }

    /// Past consolidation runs, newest first.
    pub fn consolidation_history(&self) -> Result<Vec<ConsolidationRun>> {
        self.store.consolidation_history()
    }

    /// Records a typed cause/effect edge between two memories.
    pub async fn insert_causal_link(
        &self,
        cause_id: impl Into<String>,
        effect_id: impl Into<String>,
        link_type: LinkType,
        mechanism: Option<String>,
        confidence: f64,
    ) -> Result<Option<CausalLink>> {
        causal::insert_causal_link(
            &self.store,
            self.llm.as_ref(),
            CausalLinkRequest { cause_id: cause_id.into(), effect_id: effect_id.into(), link_type, mechanism, confidence },
        )
        .await
    }

    /// Bounded, cycle-guarded traversal of causal links from `start_id`.
    pub fn traverse_causal_links(&self, start_id: &str, max_depth: Option<usize>) -> Result<Vec<CausalLink>> {
        causal::traverse(&self.store, start_id, max_depth)
    }

    /// Confidence as of `now`, exposed for callers that hold an entity and
    /// want to display its current score without going through `recall`.
    pub fn confidence_of(&self, inputs: ConfidenceInputs) -> f64 {
        crate::confidence::confidence(inputs)
    }

    /// Drops the Store handle. No data beyond what SQLite already
    /// committed is flushed here (every mutation the core performs is
    /// already transactional and durable on commit).
    pub async fn close(self) {
        tracing::info!(agent = %self.agent, "brain closed");
    }
}
