//! Exact undo of a consolidation run.

use crate::error::{CoreError, Result};
use crate::store::Store;
use crate::types::{MemoryKind, MemoryState, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackReport {
    pub rolled_back_memories: u64,
    pub restored_episodes: u64,
}

/// Every output memory goes `rolled_back`, every input episode's
/// `consolidated` flips back to `0`, the run itself becomes `rolled_back` —
/// all in one transaction. Ids across `semantics`/
/// `procedures` are disjoint so the state flip is typed-blind: it is tried
/// against whichever table actually holds the row.
pub fn rollback(store: &Store, run_id: &str) -> Result<RollbackReport> {
    let run = store.get_consolidation_run(run_id)?.ok_or_else(|| CoreError::NotFound(format!("run {run_id} not found")))?;

    if run.status == RunStatus::RolledBack {
        return Err(CoreError::StateViolation(format!("run {run_id} was already rolled back")));
    }

    let rolled_back_memories = store.with_writer_transaction(|conn| {
        let mut rolled_back_memories = 0u64;
        for memory_id in &run.output_memory_ids {
            let affected = store.set_generalized_state_tx(conn, MemoryKind::Semantic, memory_id, MemoryState::RolledBack)?;
            if affected > 0 {
                rolled_back_memories += 1;
                continue;
            }
            let affected = store.set_generalized_state_tx(conn, MemoryKind::Procedural, memory_id, MemoryState::RolledBack)?;
            if affected > 0 {
                rolled_back_memories += 1;
            }
        }

        store.unmark_episodes_consolidated_tx(conn, &run.input_episode_ids)?;
        store.mark_run_rolled_back_tx(conn, run_id)?;
        Ok(rolled_back_memories)
    })?;

    tracing::info!(run_id, rolled_back_memories, restored_episodes = run.input_episode_ids.len(), "consolidation run rolled back");

    Ok(RollbackReport { rolled_back_memories, restored_episodes: run.input_episode_ids.len() as u64 })
}
