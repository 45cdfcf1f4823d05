//! Data model.
//!
//! All identifiers are 26-character monotonic strings minted by
//! [`crate::ids`]. All timestamps are ISO-8601 UTC via `chrono`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Provenance of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    DirectObservation,
    ToldByUser,
    ToolResult,
    Inference,
    ModelGenerated,
}

impl Source {
    /// Base reliability weight feeding the confidence formula.
    pub fn reliability(self) -> f64 {
        match self {
            Source::DirectObservation => 0.95,
            Source::ToldByUser => 0.90,
            Source::ToolResult => 0.85,
            Source::Inference => 0.60,
            Source::ModelGenerated => 0.40,
        }
    }

    /// Parse a wire-format name (`direct-observation`, `told-by-user`, …).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "direct-observation" => Some(Source::DirectObservation),
            "told-by-user" => Some(Source::ToldByUser),
            "tool-result" => Some(Source::ToolResult),
            "inference" => Some(Source::Inference),
            "model-generated" => Some(Source::ModelGenerated),
            _ => None,
        }
    }

    /// Wire-format name.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::DirectObservation => "direct-observation",
            Source::ToldByUser => "told-by-user",
            Source::ToolResult => "tool-result",
            Source::Inference => "inference",
            Source::ModelGenerated => "model-generated",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable observation, the raw unit everything else is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub source: Source,
    pub source_reliability: f64,
    pub salience: f64,
    pub tags: BTreeSet<String>,
    pub causal_trigger: Option<String>,
    pub causal_consequence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
    pub embedding_version: String,
    pub supersedes: Option<String>,
    pub superseded_by: Option<String>,
    pub consolidated: bool,
}

/// `state` of a Semantic or Procedure memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    Active,
    Disputed,
    Superseded,
    ContextDependent,
    Dormant,
    RolledBack,
}

impl MemoryState {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "active" => Some(Self::Active),
            "disputed" => Some(Self::Disputed),
            "superseded" => Some(Self::Superseded),
            "context_dependent" => Some(Self::ContextDependent),
            "dormant" => Some(Self::Dormant),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disputed => "disputed",
            Self::Superseded => "superseded",
            Self::ContextDependent => "context_dependent",
            Self::Dormant => "dormant",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consolidated generalization. Shared shape for Semantic and Procedure
/// memories: procedures reuse `supporting_count`/`contradicting_count` as
/// `success_count`/`failure_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralizedMemory {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub state: MemoryState,
    pub conditions: Option<serde_json::Value>,
    pub evidence_episode_ids: Vec<String>,
    pub evidence_count: u64,
    /// `supporting_count` for semantics, `success_count` for procedures.
    pub supporting_count: u64,
    /// `contradicting_count` for semantics, `failure_count` for procedures.
    pub contradicting_count: u64,
    pub source_type_diversity: u32,
    pub consolidation_checkpoint: Option<String>,
    pub embedding_model: String,
    pub embedding_version: String,
    pub consolidation_model: Option<String>,
    pub consolidation_prompt_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: Option<DateTime<Utc>>,
    pub retrieval_count: u64,
    pub challenge_count: u64,
}

/// Which generalized-memory table a [`GeneralizedMemory`] lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Semantic,
    Procedural,
}

impl MemoryKind {
    pub fn table(self) -> &'static str {
        match self {
            MemoryKind::Semantic => "semantics",
            MemoryKind::Procedural => "procedures",
        }
    }

    pub fn vector_table(self) -> &'static str {
        match self {
            MemoryKind::Semantic => "semantic_vectors",
            MemoryKind::Procedural => "procedural_vectors",
        }
    }
}

/// Kind of relationship a [`CausalLink`] asserts between cause and effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Causal,
    Correlational,
    Temporal,
}

impl LinkType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "causal" => Some(Self::Causal),
            "correlational" => Some(Self::Correlational),
            "temporal" => Some(Self::Temporal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Correlational => "correlational",
            Self::Temporal => "temporal",
        }
    }
}

/// An asserted cause/effect relationship between two claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalLink {
    pub id: String,
    pub cause_id: String,
    pub effect_id: String,
    pub link_type: LinkType,
    pub mechanism: String,
    pub confidence: f64,
    pub evidence_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a [`Contradiction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionState {
    Open,
    Resolved,
    ContextDependent,
    Reopened,
}

impl ContradictionState {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            "context_dependent" => Some(Self::ContextDependent),
            "reopened" => Some(Self::Reopened),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::ContextDependent => "context_dependent",
            Self::Reopened => "reopened",
        }
    }
}

/// Which table a claim id in a [`Contradiction`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Episode,
    Semantic,
    Procedural,
}

impl ClaimType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "episode" => Some(Self::Episode),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }
}

/// Resolution verdict for a contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionVerdict {
    AWins,
    BWins,
    ContextDependent,
}

impl ResolutionVerdict {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "a_wins" => Some(Self::AWins),
            "b_wins" => Some(Self::BWins),
            "context_dependent" => Some(Self::ContextDependent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub verdict: ResolutionVerdict,
    pub conditions: Option<serde_json::Value>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: String,
    pub claim_a_id: String,
    pub claim_a_type: ClaimType,
    pub claim_b_id: String,
    pub claim_b_type: ClaimType,
    pub state: ContradictionState,
    pub resolution: Option<Resolution>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reopened_at: Option<DateTime<Utc>>,
    pub reopen_evidence_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status of a [`ConsolidationRun`] audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl RunStatus {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Audit record of one consolidation pass: which episodes went in, which
/// memories came out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRun {
    pub id: String,
    pub checkpoint_cursor: Option<String>,
    pub input_episode_ids: Vec<String>,
    pub output_memory_ids: Vec<String>,
    pub confidence_deltas: Option<serde_json::Value>,
    pub consolidation_model: Option<String>,
    pub consolidation_prompt_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

/// One ranked row of a recall result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallEntry {
    pub id: String,
    pub content: String,
    pub memory_type: RecallType,
    pub confidence: f64,
    pub score: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub state: Option<MemoryState>,
    pub provenance: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallType {
    Episodic,
    Semantic,
    Procedural,
}

impl RecallType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }
}
