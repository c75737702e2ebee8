//! SQL DDL for all Engram tables.
//!
//! Defines the `memories`, `memory_metadata`, `memory_links`,
//! `memory_reinforcement_history`, `memory_log`, and `schema_meta` tables plus
//! five per-sector vec0 virtual tables. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization.

use rusqlite::Connection;

use crate::memory::types::Sector;

/// All schema DDL statements for Engram's core tables.
const SCHEMA_SQL: &str = r#"
-- Core memory storage
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    primary_sector TEXT NOT NULL CHECK(primary_sector IN ('episodic','semantic','procedural','emotional','reflective')),
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    strength REAL NOT NULL DEFAULT 1.0 CHECK(strength >= 0.0 AND strength <= 1.0),
    salience REAL NOT NULL DEFAULT 0.0 CHECK(salience >= 0.0 AND salience <= 1.0),
    decay_rate REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);
CREATE INDEX IF NOT EXISTS idx_memories_sector ON memories(primary_sector);
CREATE INDEX IF NOT EXISTS idx_memories_strength ON memories(strength);
CREATE INDEX IF NOT EXISTS idx_memories_user_created ON memories(user_id, created_at);

-- Metadata sidecar (keywords/tags/parent_ids stored as JSON arrays)
CREATE TABLE IF NOT EXISTS memory_metadata (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    keywords TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    category TEXT,
    context TEXT,
    importance REAL CHECK(importance IS NULL OR (importance >= 0.0 AND importance <= 1.0)),
    is_atomic INTEGER NOT NULL DEFAULT 1,
    parent_ids TEXT NOT NULL DEFAULT '[]'
);

-- Waypoint graph: at most one edge per (source, target, type)
CREATE TABLE IF NOT EXISTS memory_links (
    source_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    link_type TEXT NOT NULL CHECK(link_type IN ('semantic','causal','temporal','analogical')),
    weight REAL NOT NULL CHECK(weight > 0.0 AND weight <= 1.0),
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, link_type)
);

CREATE INDEX IF NOT EXISTS idx_links_target ON memory_links(target_id);

-- Append-only reinforcement history
CREATE TABLE IF NOT EXISTS memory_reinforcement_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    event_type TEXT NOT NULL CHECK(event_type IN ('access','explicit','importance')),
    boost REAL NOT NULL,
    strength_before REAL NOT NULL,
    strength_after REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reinforcement_memory_time
    ON memory_reinforcement_history(memory_id, created_at DESC);

-- Audit log
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','reinforce','decay','consolidate','prune','delete','import')),
    memory_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual tables must be created separately (sqlite-vec syntax).
/// One table per sector; the row id is `"{namespace}/{memory_id}"`.
fn vec_table_sql(sector: Sector, dimensions: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(\n    id TEXT PRIMARY KEY,\n    embedding FLOAT[{dimensions}]\n);",
        vec_table_name(sector)
    )
}

/// Name of the vec0 table holding a sector's embeddings.
pub fn vec_table_name(sector: Sector) -> &'static str {
    match sector {
        Sector::Episodic => "vec_episodic",
        Sector::Semantic => "vec_semantic",
        Sector::Procedural => "vec_procedural",
        Sector::Emotional => "vec_emotional",
        Sector::Reflective => "vec_reflective",
    }
}

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    init_schema_with_dimensions(conn, crate::embedding::EMBEDDING_DIM)
}

/// Initialize schema with an explicit embedding dimension.
pub fn init_schema_with_dimensions(
    conn: &Connection,
    dimensions: usize,
) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    for sector in Sector::ALL {
        conn.execute_batch(&vec_table_sql(sector, dimensions))?;
    }

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
