//! The Store.
//!
//! A `Mutex<Connection>` reader/writer split, PRAGMAs applied in
//! `configure_connection`, and `rusqlite::Error` wrapped into the
//! crate-wide `CoreError` with `#[from]`. Owns every entity row and the
//! three per-type HNSW indices ([`crate::search::VectorIndex`]); every
//! other component borrows a `&Store`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::search::{VectorIndex, OVERFETCH};
use crate::types::{
    CausalLink, ClaimType, Contradiction, ContradictionState, Episode, GeneralizedMemory,
    LinkType, MemoryKind, MemoryState, Resolution, RunStatus, Source,
};

use super::migrations;

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn json_text<T: serde::Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "null".to_string())
}

/// Equality filters applied to the episode vector shadow table.
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub source: Option<Source>,
    /// When `true`, only episodes with `superseded_by IS NULL` match.
    pub not_superseded: bool,
}

/// The Store: one SQLite file, three in-memory HNSW indices rebuilt from
/// shadow tables on open.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    dimensions: usize,
    episode_index: Mutex<VectorIndex>,
    semantic_index: Mutex<VectorIndex>,
    procedural_index: Mutex<VectorIndex>,
}

impl Store {
    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    }

    /// Open (creating if absent) the store at `dir/engram.db`.
    ///
    /// `dimensions`, when supplied, pins the vector dimensionality. A store
    /// opened once with a given dimension fatally rejects any later open
    /// with a different one, before any mutation runs.
    pub fn open(dir: &Path, dimensions: Option<usize>) -> Result<Self> {
        if let Some(d) = dimensions {
            if d == 0 {
                return Err(CoreError::InvalidInput(format!(
                    "dimensions must be a positive integer, got {d}"
                )));
            }
        }

        std::fs::create_dir_all(dir)?;
        let path: PathBuf = dir.join("engram.db");

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let pinned: Option<i64> = writer_conn
            .query_row("SELECT dimensions FROM dimension_pin WHERE id = 1", [], |r| r.get(0))
            .optional()?;

        let resolved_dimensions = match (pinned, dimensions) {
            (Some(stored), Some(requested)) if stored as usize != requested => {
                // Fatal: drop the connection without mutating anything else.
                drop(writer_conn);
                return Err(CoreError::DimensionMismatch { stored: stored as usize, requested });
            }
            (Some(stored), _) => stored as usize,
            (None, Some(requested)) => {
                writer_conn.execute(
                    "INSERT INTO dimension_pin (id, dimensions) VALUES (1, ?1)",
                    params![requested as i64],
                )?;
                requested
            }
            (None, None) => {
                return Err(CoreError::InvalidInput(
                    "store has no pinned dimension yet; `dimensions` must be supplied on first open".into(),
                ));
            }
        };

        tracing::info!(dimensions = resolved_dimensions, path = %path.display(), "store opened");

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            dimensions: resolved_dimensions,
            episode_index: Mutex::new(VectorIndex::new(resolved_dimensions).map_err(|e| CoreError::VectorIndex(e.to_string()))?),
            semantic_index: Mutex::new(VectorIndex::new(resolved_dimensions).map_err(|e| CoreError::VectorIndex(e.to_string()))?),
            procedural_index: Mutex::new(VectorIndex::new(resolved_dimensions).map_err(|e| CoreError::VectorIndex(e.to_string()))?),
        };

        store.rebuild_vector_indices()?;
        store.run_legacy_migration()?;
        Ok(store)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn rebuild_vector_indices(&self) -> Result<()> {
        let reader = self.reader.lock().expect("reader lock poisoned");

        {
            let mut stmt = reader.prepare("SELECT id, embedding FROM episode_vectors")?;
            let rows: Vec<(String, Vec<u8>)> = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            let mut index = self.episode_index.lock().expect("episode index lock poisoned");
            for (id, blob) in rows {
                index.add(&id, &bytes_to_vector(&blob)).map_err(|e| CoreError::VectorIndex(e.to_string()))?;
            }
        }
        {
            let mut stmt = reader.prepare("SELECT id, embedding FROM semantic_vectors")?;
            let rows: Vec<(String, Vec<u8>)> = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            let mut index = self.semantic_index.lock().expect("semantic index lock poisoned");
            for (id, blob) in rows {
                index.add(&id, &bytes_to_vector(&blob)).map_err(|e| CoreError::VectorIndex(e.to_string()))?;
            }
        }
        {
            let mut stmt = reader.prepare("SELECT id, embedding FROM procedural_vectors")?;
            let rows: Vec<(String, Vec<u8>)> = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            let mut index = self.procedural_index.lock().expect("procedural index lock poisoned");
            for (id, blob) in rows {
                index.add(&id, &bytes_to_vector(&blob)).map_err(|e| CoreError::VectorIndex(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// If row tables carry embedding blobs but the shadow vector tables are
    /// empty, populate them once. Idempotent, guarded by "vector table
    /// empty".
    fn run_legacy_migration(&self) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let vector_count: i64 = writer.query_row("SELECT COUNT(*) FROM episode_vectors", [], |r| r.get(0))?;
        if vector_count > 0 {
            return Ok(());
        }

        let legacy_episode_count: i64 =
            writer.query_row("SELECT COUNT(*) FROM episodes WHERE embedding IS NOT NULL", [], |r| r.get(0))?;
        let legacy_semantic_count: i64 =
            writer.query_row("SELECT COUNT(*) FROM semantics WHERE embedding IS NOT NULL", [], |r| r.get(0))?;
        let legacy_procedure_count: i64 =
            writer.query_row("SELECT COUNT(*) FROM procedures WHERE embedding IS NOT NULL", [], |r| r.get(0))?;

        if legacy_episode_count == 0 && legacy_semantic_count == 0 && legacy_procedure_count == 0 {
            return Ok(());
        }

        tracing::info!("running legacy vector-table migration");

        writer.execute_batch("BEGIN IMMEDIATE;")?;
        let result: rusqlite::Result<()> = (|| {
            writer.execute_batch(
                "INSERT INTO episode_vectors (id, embedding, source, consolidated, superseded_by)
                 SELECT id, embedding, source, consolidated, superseded_by FROM episodes WHERE embedding IS NOT NULL;
                 INSERT INTO semantic_vectors (id, embedding, state)
                 SELECT id, embedding, state FROM semantics WHERE embedding IS NOT NULL;
                 INSERT INTO procedural_vectors (id, embedding, state)
                 SELECT id, embedding, state FROM procedures WHERE embedding IS NOT NULL;",
            )
        })();

        match result {
            Ok(()) => writer.execute_batch("COMMIT;")?,
            Err(e) => {
                writer.execute_batch("ROLLBACK;")?;
                return Err(e.into());
            }
        }
        drop(writer);
        self.rebuild_vector_indices()
    }

    // ------------------------------------------------------------------
    // Episodes
    // ------------------------------------------------------------------

    pub fn insert_episode(&self, episode: &Episode) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("BEGIN IMMEDIATE;")?;
        let result: Result<()> = (|| {
            writer.execute(
                "INSERT INTO episodes (
                    id, content, embedding, source, source_reliability, salience, tags,
                    causal_trigger, causal_consequence, created_at, embedding_model,
                    embedding_version, supersedes, superseded_by, consolidated
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    episode.id,
                    episode.content,
                    episode.embedding.as_ref().map(|v| vector_to_bytes(v)),
                    episode.source.as_str(),
                    episode.source_reliability,
                    episode.salience,
                    json_text(&episode.tags),
                    episode.causal_trigger,
                    episode.causal_consequence,
                    episode.created_at.to_rfc3339(),
                    episode.embedding_model,
                    episode.embedding_version,
                    episode.supersedes,
                    episode.superseded_by,
                    episode.consolidated as i64,
                ],
            )?;

            if let Some(embedding) = &episode.embedding {
                writer.execute(
                    "INSERT INTO episode_vectors (id, embedding, source, consolidated, superseded_by)
                     VALUES (?1,?2,?3,?4,?5)",
                    params![
                        episode.id,
                        vector_to_bytes(embedding),
                        episode.source.as_str(),
                        episode.consolidated as i64,
                        episode.superseded_by,
                    ],
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                writer.execute_batch("COMMIT;")?;
                if let Some(embedding) = &episode.embedding {
                    let mut index = self.episode_index.lock().expect("episode index lock poisoned");
                    index.add(&episode.id, embedding).map_err(|e| CoreError::VectorIndex(e.to_string()))?;
                }
                Ok(())
            }
            Err(e) => {
                writer.execute_batch("ROLLBACK;")?;
                Err(e)
            }
        }
    }

    fn row_to_episode(row: &rusqlite::Row) -> rusqlite::Result<Episode> {
        let source: String = row.get("source")?;
        let tags_text: String = row.get("tags")?;
        let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
        let created_at: String = row.get("created_at")?;
        Ok(Episode {
            id: row.get("id")?,
            content: row.get("content")?,
            embedding: embedding_blob.map(|b| bytes_to_vector(&b)),
            source: Source::parse(&source).unwrap_or(Source::Inference),
            source_reliability: row.get("source_reliability")?,
            salience: row.get("salience")?,
            tags: serde_json::from_str::<BTreeSet<String>>(&tags_text).unwrap_or_default(),
            causal_trigger: row.get("causal_trigger")?,
            causal_consequence: row.get("causal_consequence")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            embedding_model: row.get("embedding_model")?,
            embedding_version: row.get("embedding_version")?,
            supersedes: row.get("supersedes")?,
            superseded_by: row.get("superseded_by")?,
            consolidated: row.get::<_, i64>("consolidated")? != 0,
        })
    }

    pub fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM episodes WHERE id = ?1", params![id], Self::row_to_episode)
            .optional()
            .map_err(Into::into)
    }

    pub fn set_episode_superseded_by(&self, id: &str, superseded_by: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let changed = writer.execute(
            "UPDATE episodes SET superseded_by = ?2 WHERE id = ?1",
            params![id, superseded_by],
        )?;
        if changed == 0 {
            return Err(CoreError::StateViolation(format!("episode {id} does not exist")));
        }
        writer.execute("UPDATE episode_vectors SET superseded_by = ?2 WHERE id = ?1", params![id, superseded_by])?;
        Ok(())
    }

    /// Mark a batch of episodes `consolidated = 1`, as part of the caller's
    /// already-open writer transaction context (the Consolidator wraps this
    /// and the promotion insert in one transaction at the `rusqlite`
    /// connection level via [`Store::with_writer_transaction`]).
    pub fn mark_episodes_consolidated(&self, conn: &Connection, ids: &[String]) -> rusqlite::Result<()> {
        for id in ids {
            conn.execute("UPDATE episodes SET consolidated = 1 WHERE id = ?1", params![id])?;
            conn.execute("UPDATE episode_vectors SET consolidated = 1 WHERE id = ?1", params![id])?;
        }
        Ok(())
    }

    pub fn unmark_episodes_consolidated(&self, ids: &[String]) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("BEGIN IMMEDIATE;")?;
        let result: rusqlite::Result<()> = (|| Self::unmark_episodes_consolidated_in(&writer, ids))();
        match result {
            Ok(()) => writer.execute_batch("COMMIT;").map_err(Into::into),
            Err(e) => {
                writer.execute_batch("ROLLBACK;")?;
                Err(e.into())
            }
        }
    }

    fn unmark_episodes_consolidated_in(conn: &Connection, ids: &[String]) -> rusqlite::Result<()> {
        for id in ids {
            conn.execute("UPDATE episodes SET consolidated = 0 WHERE id = ?1", params![id])?;
            conn.execute("UPDATE episode_vectors SET consolidated = 0 WHERE id = ?1", params![id])?;
        }
        Ok(())
    }

    /// As [`Store::unmark_episodes_consolidated`], against an already-open
    /// transaction's connection — used by [`crate::rollback`] so the
    /// episode un-flip, memory state flip, and run status update commit
    /// atomically.
    pub fn unmark_episodes_consolidated_tx(&self, conn: &Connection, ids: &[String]) -> rusqlite::Result<()> {
        Self::unmark_episodes_consolidated_in(conn, ids)
    }

    /// Snapshot of unconsolidated, non-superseded episodes carrying an
    /// embedding, in insertion (id/time) order.
    pub fn unconsolidated_episodes(&self) -> Result<Vec<Episode>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT * FROM episodes
             WHERE consolidated = 0 AND superseded_by IS NULL AND embedding IS NOT NULL
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_episode)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// kNN over the episode vector index, with equality filters resolved
    /// against live SQLite row state (optional equality filters on
    /// partition columns, since `usearch` has no native support for them).
    pub fn knn_episodes(&self, query: &[f32], k: usize, filter: &EpisodeFilter) -> Result<Vec<(Episode, f32)>> {
        let candidates = {
            let index = self.episode_index.lock().expect("episode index lock poisoned");
            index.search(query, k * OVERFETCH + OVERFETCH).map_err(|e| CoreError::VectorIndex(e.to_string()))?
        };

        let mut out = Vec::with_capacity(k);
        for (id, similarity) in candidates {
            if out.len() >= k {
                break;
            }
            if let Some(episode) = self.get_episode(&id)? {
                if filter.not_superseded && episode.superseded_by.is_some() {
                    continue;
                }
                if let Some(source) = filter.source {
                    if episode.source != source {
                        continue;
                    }
                }
                out.push((episode, similarity));
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Semantics / Procedures (shared shape, dispatched on MemoryKind)
    // ------------------------------------------------------------------

    fn row_to_generalized(kind: MemoryKind, row: &rusqlite::Row) -> rusqlite::Result<GeneralizedMemory> {
        let state: String = row.get("state")?;
        let conditions_text: Option<String> = row.get("conditions")?;
        let evidence_text: String = row.get("evidence_episode_ids")?;
        let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
        let created_at: String = row.get("created_at")?;
        let last_reinforced_at: Option<String> = row.get("last_reinforced_at")?;
        let (supporting_col, contradicting_col) = match kind {
            MemoryKind::Semantic => ("supporting_count", "contradicting_count"),
            MemoryKind::Procedural => ("success_count", "failure_count"),
        };
        Ok(GeneralizedMemory {
            id: row.get("id")?,
            content: row.get("content")?,
            embedding: embedding_blob.map(|b| bytes_to_vector(&b)),
            state: MemoryState::parse(&state).unwrap_or(MemoryState::Active),
            conditions: conditions_text.and_then(|t| serde_json::from_str(&t).ok()),
            evidence_episode_ids: serde_json::from_str(&evidence_text).unwrap_or_default(),
            evidence_count: row.get::<_, i64>("evidence_count")? as u64,
            supporting_count: row.get::<_, i64>(supporting_col)? as u64,
            contradicting_count: row.get::<_, i64>(contradicting_col)? as u64,
            source_type_diversity: row.get::<_, i64>("source_type_diversity")? as u32,
            consolidation_checkpoint: row.get("consolidation_checkpoint")?,
            embedding_model: row.get("embedding_model")?,
            embedding_version: row.get("embedding_version")?,
            consolidation_model: row.get("consolidation_model")?,
            consolidation_prompt_hash: row.get("consolidation_prompt_hash")?,
            created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            last_reinforced_at: last_reinforced_at
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|d| d.with_timezone(&Utc)),
            retrieval_count: row.get::<_, i64>("retrieval_count")? as u64,
            challenge_count: row.get::<_, i64>("challenge_count")? as u64,
        })
    }

    pub fn get_generalized(&self, kind: MemoryKind, id: &str) -> Result<Option<GeneralizedMemory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let sql = format!("SELECT * FROM {} WHERE id = ?1", kind.table());
        reader
            .query_row(&sql, params![id], |row| Self::row_to_generalized(kind, row))
            .optional()
            .map_err(Into::into)
    }

    /// Insert a new Semantic/Procedure row (created_at defaults to `now`,
    /// state `active`) plus its vector-index linkage, in one transaction.
    /// Used standalone by [`crate::truth`] seeding tests and internally by
    /// [`crate::consolidator`] (which instead writes through
    /// [`Store::with_writer_transaction`] to share the promotion txn).
    pub fn insert_generalized(&self, kind: MemoryKind, memory: &GeneralizedMemory) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("BEGIN IMMEDIATE;")?;
        let result: rusqlite::Result<()> = (|| {
            Self::insert_generalized_in(&writer, kind, memory)
        })();
        match result {
            Ok(()) => {
                writer.execute_batch("COMMIT;")?;
                drop(writer);
                if let Some(embedding) = &memory.embedding {
                    self.index_for(kind).lock().expect("index lock poisoned").add(&memory.id, embedding).map_err(|e| CoreError::VectorIndex(e.to_string()))?;
                }
                Ok(())
            }
            Err(e) => {
                writer.execute_batch("ROLLBACK;")?;
                Err(e.into())
            }
        }
    }

    fn insert_generalized_in(conn: &Connection, kind: MemoryKind, memory: &GeneralizedMemory) -> rusqlite::Result<()> {
        let (supporting_col, contradicting_col) = match kind {
            MemoryKind::Semantic => ("supporting_count", "contradicting_count"),
            MemoryKind::Procedural => ("success_count", "failure_count"),
        };
        let sql = format!(
            "INSERT INTO {} (
                id, content, embedding, state, conditions, evidence_episode_ids, evidence_count,
                {supporting_col}, {contradicting_col}, source_type_diversity, consolidation_checkpoint,
                embedding_model, embedding_version, consolidation_model, consolidation_prompt_hash,
                created_at, last_reinforced_at, retrieval_count, challenge_count
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            kind.table()
        );
        conn.execute(
            &sql,
            params![
                memory.id,
                memory.content,
                memory.embedding.as_ref().map(|v| vector_to_bytes(v)),
                memory.state.as_str(),
                memory.conditions.as_ref().map(json_text),
                json_text(&memory.evidence_episode_ids),
                memory.evidence_count as i64,
                memory.supporting_count as i64,
                memory.contradicting_count as i64,
                memory.source_type_diversity as i64,
                memory.consolidation_checkpoint,
                memory.embedding_model,
                memory.embedding_version,
                memory.consolidation_model,
                memory.consolidation_prompt_hash,
                memory.created_at.to_rfc3339(),
                memory.last_reinforced_at.map(|t| t.to_rfc3339()),
                memory.retrieval_count as i64,
                memory.challenge_count as i64,
            ],
        )?;

        let vector_table = kind.vector_table();
        if let Some(embedding) = &memory.embedding {
            conn.execute(
                &format!("INSERT INTO {vector_table} (id, embedding, state) VALUES (?1,?2,?3)"),
                params![memory.id, vector_to_bytes(embedding), memory.state.as_str()],
            )?;
        }
        Ok(())
    }

    fn index_for(&self, kind: MemoryKind) -> &Mutex<VectorIndex> {
        match kind {
            MemoryKind::Semantic => &self.semantic_index,
            MemoryKind::Procedural => &self.procedural_index,
        }
    }

    pub fn set_generalized_state(&self, kind: MemoryKind, id: &str, state: MemoryState) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            &format!("UPDATE {} SET state = ?2 WHERE id = ?1", kind.table()),
            params![id, state.as_str()],
        )?;
        writer.execute(
            &format!("UPDATE {} SET state = ?2 WHERE id = ?1", kind.vector_table()),
            params![id, state.as_str()],
        )?;
        Ok(())
    }

    /// As [`Store::set_generalized_state`], but against an already-open
    /// transaction's connection. Returns the number of rows affected in
    /// `kind`'s own table, so a caller that doesn't know which of
    /// Semantic/Procedural holds `id` can probe both and keep whichever hit.
    pub fn set_generalized_state_tx(&self, conn: &Connection, kind: MemoryKind, id: &str, state: MemoryState) -> rusqlite::Result<usize> {
        let affected = conn.execute(
            &format!("UPDATE {} SET state = ?2 WHERE id = ?1", kind.table()),
            params![id, state.as_str()],
        )?;
        conn.execute(
            &format!("UPDATE {} SET state = ?2 WHERE id = ?1", kind.vector_table()),
            params![id, state.as_str()],
        )?;
        Ok(affected)
    }

    pub fn set_generalized_conditions(&self, kind: MemoryKind, id: &str, conditions: &serde_json::Value) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            &format!("UPDATE {} SET conditions = ?2 WHERE id = ?1", kind.table()),
            params![id, json_text(conditions)],
        )?;
        Ok(())
    }

    /// Reinforce an existing Semantic/Procedure with a new supporting
    /// episode. Appends `episode_id` to the
    /// evidence list (de-duplicated, insertion order preserved), increments
    /// the supporting counter, recomputes `source_type_diversity`, bumps
    /// `last_reinforced_at`.
    pub fn reinforce_generalized(
        &self,
        kind: MemoryKind,
        id: &str,
        episode_id: &str,
        new_source: Source,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("BEGIN IMMEDIATE;")?;
        let result: Result<()> = (|| {
            let mut memory = writer
                .query_row(&format!("SELECT * FROM {} WHERE id = ?1", kind.table()), params![id], |row| {
                    Self::row_to_generalized(kind, row)
                })
                .optional()?
                .ok_or_else(|| CoreError::NotFound(format!("{} {id} not found", kind.table())))?;

            if !memory.evidence_episode_ids.iter().any(|e| e == episode_id) {
                memory.evidence_episode_ids.push(episode_id.to_string());
            }

            let mut sources: BTreeSet<Source> = BTreeSet::new();
            sources.insert(new_source);
            for eid in &memory.evidence_episode_ids {
                if let Some(episode) = self.get_episode(eid)? {
                    sources.insert(episode.source);
                }
            }

            let supporting_col = match kind {
                MemoryKind::Semantic => "supporting_count",
                MemoryKind::Procedural => "success_count",
            };

            writer.execute(
                &format!(
                    "UPDATE {} SET evidence_episode_ids = ?2, {supporting_col} = {supporting_col} + 1,
                     source_type_diversity = ?3, last_reinforced_at = ?4 WHERE id = ?1",
                    kind.table()
                ),
                params![
                    id,
                    json_text(&memory.evidence_episode_ids),
                    sources.len().min(5) as i64,
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => writer.execute_batch("COMMIT;").map_err(Into::into),
            Err(e) => {
                writer.execute_batch("ROLLBACK;")?;
                Err(e)
            }
        }
    }

    pub fn bump_generalized_contradicted(&self, kind: MemoryKind, id: &str) -> Result<()> {
        let contradicting_col = match kind {
            MemoryKind::Semantic => "contradicting_count",
            MemoryKind::Procedural => "failure_count",
        };
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            &format!("UPDATE {} SET {contradicting_col} = {contradicting_col} + 1, challenge_count = challenge_count + 1 WHERE id = ?1", kind.table()),
            params![id],
        )?;
        Ok(())
    }

    pub fn bump_retrieval(&self, kind: MemoryKind, id: &str, now: DateTime<Utc>) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            &format!(
                "UPDATE {} SET retrieval_count = retrieval_count + 1, last_reinforced_at = ?2 WHERE id = ?1",
                kind.table()
            ),
            params![id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// kNN over a generalized-memory vector index, filtering to the
    /// requested states (`active`/`context_dependent`, plus `dormant` when
    /// the caller asks for it).
    pub fn knn_generalized(
        &self,
        kind: MemoryKind,
        query: &[f32],
        k: usize,
        allowed_states: &[MemoryState],
    ) -> Result<Vec<(GeneralizedMemory, f32)>> {
        let candidates = {
            let index = self.index_for(kind).lock().expect("index lock poisoned");
            index.search(query, k * OVERFETCH + OVERFETCH).map_err(|e| CoreError::VectorIndex(e.to_string()))?
        };

        let mut out = Vec::with_capacity(k);
        for (id, similarity) in candidates {
            if out.len() >= k {
                break;
            }
            if let Some(memory) = self.get_generalized(kind, &id)? {
                if allowed_states.contains(&memory.state) {
                    out.push((memory, similarity));
                }
            }
        }
        Ok(out)
    }

    /// Single closest active-or-context-dependent Semantic to `query`
    /// (`k = 1`).
    pub fn closest_active_semantic(&self, query: &[f32]) -> Result<Option<(GeneralizedMemory, f32)>> {
        let hits = self.knn_generalized(
            MemoryKind::Semantic,
            query,
            1,
            &[MemoryState::Active, MemoryState::ContextDependent],
        )?;
        Ok(hits.into_iter().next())
    }

    pub fn all_in_state(&self, kind: MemoryKind, state: MemoryState) -> Result<Vec<GeneralizedMemory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let sql = format!("SELECT * FROM {} WHERE state = ?1", kind.table());
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt
            .query_map(params![state.as_str()], |row| Self::row_to_generalized(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Contradictions
    // ------------------------------------------------------------------

    fn row_to_contradiction(row: &rusqlite::Row) -> rusqlite::Result<Contradiction> {
        let state: String = row.get("state")?;
        let claim_a_type: String = row.get("claim_a_type")?;
        let claim_b_type: String = row.get("claim_b_type")?;
        let resolution_text: Option<String> = row.get("resolution")?;
        let created_at: String = row.get("created_at")?;
        let resolved_at: Option<String> = row.get("resolved_at")?;
        let reopened_at: Option<String> = row.get("reopened_at")?;
        Ok(Contradiction {
            id: row.get("id")?,
            claim_a_id: row.get("claim_a_id")?,
            claim_a_type: ClaimType::parse(&claim_a_type).unwrap_or(ClaimType::Semantic),
            claim_b_id: row.get("claim_b_id")?,
            claim_b_type: ClaimType::parse(&claim_b_type).unwrap_or(ClaimType::Episode),
            state: ContradictionState::parse(&state).unwrap_or(ContradictionState::Open),
            resolution: resolution_text.and_then(|t| serde_json::from_str(&t).ok()),
            resolved_at: resolved_at.and_then(|t| DateTime::parse_from_rfc3339(&t).ok()).map(|d| d.with_timezone(&Utc)),
            reopened_at: reopened_at.and_then(|t| DateTime::parse_from_rfc3339(&t).ok()).map(|d| d.with_timezone(&Utc)),
            reopen_evidence_id: row.get("reopen_evidence_id")?,
            created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        })
    }

    pub fn insert_contradiction(&self, contradiction: &Contradiction) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO contradictions (
                id, claim_a_id, claim_a_type, claim_b_id, claim_b_type, state, resolution,
                resolved_at, reopened_at, reopen_evidence_id, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                contradiction.id,
                contradiction.claim_a_id,
                contradiction.claim_a_type.as_str(),
                contradiction.claim_b_id,
                contradiction.claim_b_type.as_str(),
                contradiction.state.as_str(),
                contradiction.resolution.as_ref().map(json_text),
                contradiction.resolved_at.map(|t| t.to_rfc3339()),
                contradiction.reopened_at.map(|t| t.to_rfc3339()),
                contradiction.reopen_evidence_id,
                contradiction.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_contradiction(&self, id: &str) -> Result<Option<Contradiction>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM contradictions WHERE id = ?1", params![id], Self::row_to_contradiction)
            .optional()
            .map_err(Into::into)
    }

    pub fn resolve_contradiction(
        &self,
        id: &str,
        state: ContradictionState,
        resolution: &Resolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let changed = writer.execute(
            "UPDATE contradictions SET state = ?2, resolution = ?3, resolved_at = ?4 WHERE id = ?1",
            params![id, state.as_str(), json_text(resolution), resolved_at.to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("contradiction {id} not found")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Causal links
    // ------------------------------------------------------------------

    pub fn insert_causal_link(&self, link: &CausalLink) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO causal_links (id, cause_id, effect_id, link_type, mechanism, confidence, evidence_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                link.id,
                link.cause_id,
                link.effect_id,
                link.link_type.as_str(),
                link.mechanism,
                link.confidence,
                link.evidence_count as i64,
                link.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_causal_link(row: &rusqlite::Row) -> rusqlite::Result<CausalLink> {
        let link_type: String = row.get("link_type")?;
        let created_at: String = row.get("created_at")?;
        Ok(CausalLink {
            id: row.get("id")?,
            cause_id: row.get("cause_id")?,
            effect_id: row.get("effect_id")?,
            link_type: LinkType::parse(&link_type).unwrap_or(LinkType::Correlational),
            mechanism: row.get("mechanism")?,
            confidence: row.get("confidence")?,
            evidence_count: row.get::<_, i64>("evidence_count")? as u64,
            created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        })
    }

    pub fn causal_links_from(&self, cause_id: &str) -> Result<Vec<CausalLink>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT * FROM causal_links WHERE cause_id = ?1")?;
        let rows = stmt
            .query_map(params![cause_id], Self::row_to_causal_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Consolidation runs
    // ------------------------------------------------------------------

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<crate::types::ConsolidationRun> {
        let input_text: String = row.get("input_episode_ids")?;
        let output_text: String = row.get("output_memory_ids")?;
        let deltas_text: Option<String> = row.get("confidence_deltas")?;
        let started_at: String = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        let status: String = row.get("status")?;
        Ok(crate::types::ConsolidationRun {
            id: row.get("id")?,
            checkpoint_cursor: row.get("checkpoint_cursor")?,
            input_episode_ids: serde_json::from_str(&input_text).unwrap_or_default(),
            output_memory_ids: serde_json::from_str(&output_text).unwrap_or_default(),
            confidence_deltas: deltas_text.and_then(|t| serde_json::from_str(&t).ok()),
            consolidation_model: row.get("consolidation_model")?,
            consolidation_prompt_hash: row.get("consolidation_prompt_hash")?,
            started_at: DateTime::parse_from_rfc3339(&started_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            completed_at: completed_at.and_then(|t| DateTime::parse_from_rfc3339(&t).ok()).map(|d| d.with_timezone(&Utc)),
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Running),
        })
    }

    pub fn start_consolidation_run(&self, id: &str, started_at: DateTime<Utc>) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO consolidation_runs (id, started_at, status) VALUES (?1, ?2, 'running')",
            params![id, started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn finish_consolidation_run(
        &self,
        id: &str,
        status: RunStatus,
        input_episode_ids: &[String],
        output_memory_ids: &[String],
        consolidation_model: Option<&str>,
        consolidation_prompt_hash: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE consolidation_runs SET status = ?2, input_episode_ids = ?3, output_memory_ids = ?4,
             consolidation_model = ?5, consolidation_prompt_hash = ?6, completed_at = ?7 WHERE id = ?1",
            params![
                id,
                status.as_str(),
                json_text(&input_episode_ids.to_vec()),
                json_text(&output_memory_ids.to_vec()),
                consolidation_model,
                consolidation_prompt_hash,
                completed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_consolidation_run(&self, id: &str) -> Result<Option<crate::types::ConsolidationRun>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM consolidation_runs WHERE id = ?1", params![id], Self::row_to_run)
            .optional()
            .map_err(Into::into)
    }

    pub fn mark_run_rolled_back(&self, id: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute("UPDATE consolidation_runs SET status = 'rolled_back' WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// As [`Store::mark_run_rolled_back`], against an already-open
    /// transaction's connection.
    pub fn mark_run_rolled_back_tx(&self, conn: &Connection, id: &str) -> rusqlite::Result<()> {
        conn.execute("UPDATE consolidation_runs SET status = 'rolled_back' WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn consolidation_history(&self) -> Result<Vec<crate::types::ConsolidationRun>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT * FROM consolidation_runs ORDER BY started_at DESC, id DESC")?;
        let rows = stmt.query_map([], Self::row_to_run)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Consolidation promotion: shared writer transaction
    // ------------------------------------------------------------------

    /// Run `f` with exclusive access to the writer connection inside a
    /// single transaction. Used by [`crate::consolidator`] so the principle
    /// insert, vector-index row, and episode `consolidated` flips all
    /// commit or roll back together.
    pub fn with_writer_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("BEGIN IMMEDIATE;")?;
        match f(&writer) {
            Ok(value) => {
                writer.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(e) => {
                writer.execute_batch("ROLLBACK;")?;
                Err(e)
            }
        }
    }

    pub fn insert_generalized_tx(&self, conn: &Connection, kind: MemoryKind, memory: &GeneralizedMemory) -> Result<()> {
        Self::insert_generalized_in(conn, kind, memory).map_err(Into::into)
    }

    /// Sync an in-memory vector index after a transaction committed a new
    /// embedding. Must be called once the owning transaction has committed.
    pub fn sync_vector_index(&self, kind: MemoryKind, id: &str, embedding: &[f32]) -> Result<()> {
        self.index_for(kind)
            .lock()
            .expect("index lock poisoned")
            .add(id, embedding)
            .map_err(|e| CoreError::VectorIndex(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn count_episodes(&self) -> Result<i64> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        Ok(reader.query_row("SELECT COUNT(*) FROM episodes", [], |r| r.get(0))?)
    }

    pub fn count_in_state(&self, kind: MemoryKind, state: MemoryState) -> Result<i64> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        Ok(reader.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE state = ?1", kind.table()),
            params![state.as_str()],
            |r| r.get(0),
        )?)
    }

    pub fn count_total(&self, kind: MemoryKind) -> Result<i64> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        Ok(reader.query_row(&format!("SELECT COUNT(*) FROM {}", kind.table()), [], |r| r.get(0))?)
    }

    pub fn count_contradictions_in_state(&self, state: ContradictionState) -> Result<i64> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM contradictions WHERE state = ?1",
            params![state.as_str()],
            |r| r.get(0),
        )?)
    }

    pub fn count_causal_links(&self) -> Result<i64> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        Ok(reader.query_row("SELECT COUNT(*) FROM causal_links", [], |r| r.get(0))?)
    }
}

impl PartialOrd for Source {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Source {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Some(8)).unwrap();
        (dir, store)
    }

    fn episode(content: &str, source: Source, embedding: Vec<f32>) -> Episode {
        Episode {
            id: crate::ids::new_id(),
            content: content.to_string(),
            embedding: Some(embedding),
            source,
            source_reliability: source.reliability(),
            salience: 0.5,
            tags: BTreeSet::new(),
            causal_trigger: None,
            causal_consequence: None,
            created_at: Utc::now(),
            embedding_model: "mock".into(),
            embedding_version: "1".into(),
            supersedes: None,
            superseded_by: None,
            consolidated: false,
        }
    }

    #[test]
    fn open_with_matching_dimensions_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        Store::open(dir.path(), Some(16)).unwrap();
        let reopened = Store::open(dir.path(), Some(16)).unwrap();
        assert_eq!(reopened.dimensions(), 16);
    }

    #[test]
    fn open_with_mismatched_dimensions_fails_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        Store::open(dir.path(), Some(64)).unwrap();
        let err = Store::open(dir.path(), Some(128)).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { stored: 64, requested: 128 }));
    }

    #[test]
    fn insert_and_get_episode_roundtrips() {
        let (_dir, store) = test_store();
        let e = episode("hello", Source::DirectObservation, vec![0.1; 8]);
        store.insert_episode(&e).unwrap();
        let fetched = store.get_episode(&e.id).unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
        assert_eq!(fetched.embedding, Some(vec![0.1; 8]));
    }

    #[test]
    fn knn_episodes_returns_nearest() {
        let (_dir, store) = test_store();
        let e1 = episode("a", Source::DirectObservation, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let e2 = episode("b", Source::DirectObservation, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        store.insert_episode(&e1).unwrap();
        store.insert_episode(&e2).unwrap();

        let hits = store.knn_episodes(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1, &EpisodeFilter::default()).unwrap();
        assert_eq!(hits[0].0.id, e1.id);
    }

    #[test]
    fn query_against_empty_database_returns_empty() {
        let (_dir, store) = test_store();
        let hits = store.knn_episodes(&[0.0; 8], 5, &EpisodeFilter::default()).unwrap();
        assert!(hits.is_empty());
    }
}
