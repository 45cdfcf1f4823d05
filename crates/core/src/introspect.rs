//! Aggregate counters from single-pass queries over memory state.

use crate::error::Result;
use crate::store::Store;
use crate::types::{ContradictionState, MemoryKind, MemoryState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntrospectReport {
    pub total_episodes: i64,
    pub total_semantics: i64,
    pub active_semantics: i64,
    pub dormant_semantics: i64,
    pub disputed_semantics: i64,
    pub total_procedures: i64,
    pub active_procedures: i64,
    pub dormant_procedures: i64,
    pub open_contradictions: i64,
    pub total_causal_links: i64,
}

/// One pass per counter over the Store's already-indexed columns; no
/// aggregation happens outside SQL.
pub fn introspect(store: &Store) -> Result<IntrospectReport> {
    Ok(IntrospectReport {
        total_episodes: store.count_episodes()?,
        total_semantics: store.count_total(MemoryKind::Semantic)?,
        active_semantics: store.count_in_state(MemoryKind::Semantic, MemoryState::Active)?,
        dormant_semantics: store.count_in_state(MemoryKind::Semantic, MemoryState::Dormant)?,
        disputed_semantics: store.count_in_state(MemoryKind::Semantic, MemoryState::Disputed)?,
        total_procedures: store.count_total(MemoryKind::Procedural)?,
        active_procedures: store.count_in_state(MemoryKind::Procedural, MemoryState::Active)?,
        dormant_procedures: store.count_in_state(MemoryKind::Procedural, MemoryState::Dormant)?,
        open_contradictions: store.count_contradictions_in_state(ContradictionState::Open)?,
        total_causal_links: store.count_causal_links()?,
    })
}
