//! Database migrations.
//!
//! A `Migration { version, description, up }` ladder tracked via a
//! `MIGRATIONS` table, applied in order by `get_current_version`/
//! `apply_migrations`.

/// A database migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: episodes, semantics, procedures, causal links, contradictions, consolidation runs, dimension pin",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Vector-index shadow tables for episodes, semantics, procedures",
        up: MIGRATION_V2_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS dimension_pin (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    dimensions INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS episodes (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    source TEXT NOT NULL,
    source_reliability REAL NOT NULL,
    salience REAL NOT NULL DEFAULT 0.5,
    tags TEXT NOT NULL DEFAULT '[]',
    causal_trigger TEXT,
    causal_consequence TEXT,
    created_at TEXT NOT NULL,
    embedding_model TEXT NOT NULL DEFAULT '',
    embedding_version TEXT NOT NULL DEFAULT '',
    supersedes TEXT REFERENCES episodes(id) ON DELETE RESTRICT,
    superseded_by TEXT REFERENCES episodes(id) ON DELETE RESTRICT,
    consolidated INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_episodes_consolidated ON episodes(consolidated);
CREATE INDEX IF NOT EXISTS idx_episodes_superseded_by ON episodes(superseded_by);
CREATE INDEX IF NOT EXISTS idx_episodes_created_at ON episodes(created_at);

CREATE TABLE IF NOT EXISTS semantics (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    state TEXT NOT NULL DEFAULT 'active',
    conditions TEXT,
    evidence_episode_ids TEXT NOT NULL DEFAULT '[]',
    evidence_count INTEGER NOT NULL DEFAULT 0,
    supporting_count INTEGER NOT NULL DEFAULT 0,
    contradicting_count INTEGER NOT NULL DEFAULT 0,
    source_type_diversity INTEGER NOT NULL DEFAULT 0,
    consolidation_checkpoint TEXT,
    embedding_model TEXT NOT NULL DEFAULT '',
    embedding_version TEXT NOT NULL DEFAULT '',
    consolidation_model TEXT,
    consolidation_prompt_hash TEXT,
    created_at TEXT NOT NULL,
    last_reinforced_at TEXT,
    retrieval_count INTEGER NOT NULL DEFAULT 0,
    challenge_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_semantics_state ON semantics(state);

CREATE TABLE IF NOT EXISTS procedures (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    state TEXT NOT NULL DEFAULT 'active',
    trigger_conditions TEXT,
    evidence_episode_ids TEXT NOT NULL DEFAULT '[]',
    evidence_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    source_type_diversity INTEGER NOT NULL DEFAULT 0,
    consolidation_checkpoint TEXT,
    embedding_model TEXT NOT NULL DEFAULT '',
    embedding_version TEXT NOT NULL DEFAULT '',
    consolidation_model TEXT,
    consolidation_prompt_hash TEXT,
    created_at TEXT NOT NULL,
    last_reinforced_at TEXT,
    retrieval_count INTEGER NOT NULL DEFAULT 0,
    challenge_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_procedures_state ON procedures(state);

CREATE TABLE IF NOT EXISTS causal_links (
    id TEXT PRIMARY KEY,
    cause_id TEXT NOT NULL,
    effect_id TEXT NOT NULL,
    link_type TEXT NOT NULL,
    mechanism TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 0.5,
    evidence_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_causal_links_cause ON causal_links(cause_id);
CREATE INDEX IF NOT EXISTS idx_causal_links_effect ON causal_links(effect_id);

CREATE TABLE IF NOT EXISTS contradictions (
    id TEXT PRIMARY KEY,
    claim_a_id TEXT NOT NULL,
    claim_a_type TEXT NOT NULL,
    claim_b_id TEXT NOT NULL,
    claim_b_type TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'open',
    resolution TEXT,
    resolved_at TEXT,
    reopened_at TEXT,
    reopen_evidence_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contradictions_state ON contradictions(state);

CREATE TABLE IF NOT EXISTS consolidation_runs (
    id TEXT PRIMARY KEY,
    checkpoint_cursor TEXT,
    input_episode_ids TEXT NOT NULL DEFAULT '[]',
    output_memory_ids TEXT NOT NULL DEFAULT '[]',
    confidence_deltas TEXT,
    consolidation_model TEXT,
    consolidation_prompt_hash TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running'
);

CREATE INDEX IF NOT EXISTS idx_consolidation_runs_started ON consolidation_runs(started_at);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS episode_vectors (
    id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    source TEXT NOT NULL,
    consolidated INTEGER NOT NULL,
    superseded_by TEXT
);

CREATE TABLE IF NOT EXISTS semantic_vectors (
    id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS procedural_vectors (
    id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    state TEXT NOT NULL
);
"#;

/// Get current schema version from database.
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations, tracking applied versions in `schema_version`.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
                rusqlite::params![migration.version],
            )?;
            applied += 1;
        }
    }

    Ok(applied)
}
