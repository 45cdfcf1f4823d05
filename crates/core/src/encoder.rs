//! Episode construction and insertion.
//!
//! Pure request validation and row construction live here; the embedding
//! call and the detached Validator dispatch are async concerns owned by
//! [`crate::brain`].

use std::collections::BTreeSet;

use chrono::Utc;

use crate::error::{CoreError, Result};
use crate::ids;
use crate::store::Store;
use crate::types::{Episode, Source};

/// Inputs to `encode`/`encode_batch`: `{content, source, salience?,
/// causal?, tags?, supersedes?}`.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub content: String,
    pub source: Source,
    pub salience: Option<f64>,
    pub causal_trigger: Option<String>,
    pub causal_consequence: Option<String>,
    pub tags: BTreeSet<String>,
    pub supersedes: Option<String>,
}

impl EncodeRequest {
    pub fn new(content: impl Into<String>, source: Source) -> Self {
        Self {
            content: content.into(),
            source,
            salience: None,
            causal_trigger: None,
            causal_consequence: None,
            tags: BTreeSet::new(),
            supersedes: None,
        }
    }
}

/// Empty content, salience out of `[0,1]`, and superseding a nonexistent
/// episode are all caught here, before anything is embedded.
pub fn validate_request(store: &Store, request: &EncodeRequest) -> Result<()> {
    if request.content.trim().is_empty() {
        return Err(CoreError::InvalidInput("content must not be empty".into()));
    }
    if let Some(salience) = request.salience {
        if !(0.0..=1.0).contains(&salience) {
            return Err(CoreError::InvalidInput(format!(
                "salience must be within [0,1], got {salience}"
            )));
        }
    }
    if let Some(supersedes) = &request.supersedes {
        if store.get_episode(supersedes)?.is_none() {
            return Err(CoreError::StateViolation(format!(
                "cannot supersede nonexistent episode {supersedes}"
            )));
        }
    }
    Ok(())
}

/// Build the `Episode` row for a validated request, given its already
/// computed embedding.
pub fn build_episode(
    request: &EncodeRequest,
    embedding: Vec<f32>,
    embedding_model: &str,
    embedding_version: &str,
) -> Episode {
    Episode {
        id: ids::new_id(),
        content: request.content.clone(),
        embedding: Some(embedding),
        source: request.source,
        source_reliability: request.source.reliability(),
        salience: request.salience.unwrap_or(0.5),
        tags: request.tags.clone(),
        causal_trigger: request.causal_trigger.clone(),
        causal_consequence: request.causal_consequence.clone(),
        created_at: Utc::now(),
        embedding_model: embedding_model.to_string(),
        embedding_version: embedding_version.to_string(),
        supersedes: request.supersedes.clone(),
        superseded_by: None,
        consolidated: false,
    }
}

/// Persist an already-built episode, wiring up the `supersedes` backlink.
pub fn encode_one(store: &Store, episode: &Episode) -> Result<()> {
    store.insert_episode(episode)?;
    if let Some(previous) = &episode.supersedes {
        store.set_episode_superseded_by(previous, &episode.id)?;
    }
    Ok(())
}
