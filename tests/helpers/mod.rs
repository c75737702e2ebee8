#![allow(dead_code)]

use engram::config::DecayConfig;
use engram::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use engram::memory::store::{create_memory, CreateMemoryRequest};
use engram::memory::types::{MemoryMetadata, Sector};
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    engram::db::load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    engram::db::schema::init_schema(&conn).unwrap();
    engram::db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// Deterministic embedding provider: a unit spike at a position hashed from
/// the text. Identical text always embeds identically; the sector cue
/// prefixes shift the spike per sector.
pub struct SpikeProvider;

impl EmbeddingProvider for SpikeProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        let idx = text
            .bytes()
            .fold(0usize, |acc, b| (acc * 31 + b as usize) % EMBEDDING_DIM);
        v[idx] = 1.0;
        Ok(v)
    }
}

/// Create a memory through the full repository write path.
pub fn seed_memory(
    conn: &mut Connection,
    user: &str,
    content: &str,
    sector: Sector,
    metadata: MemoryMetadata,
) -> String {
    let request = CreateMemoryRequest {
        content: content.into(),
        user_id: user.into(),
        session_id: "test-session".into(),
        primary_sector: sector,
        salience: 0.5,
        metadata,
        embeddings: None,
    };
    create_memory(conn, &SpikeProvider, &request, &DecayConfig::default(), "default")
        .unwrap()
        .id
}

/// Set `last_accessed` (and optionally `created_at`) to `days` ago.
pub fn backdate(conn: &Connection, memory_id: &str, days: i64, touch_created: bool) {
    let past = (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339();
    if touch_created {
        conn.execute(
            "UPDATE memories SET last_accessed = ?1, created_at = ?1 WHERE id = ?2",
            rusqlite::params![past, memory_id],
        )
        .unwrap();
    } else {
        conn.execute(
            "UPDATE memories SET last_accessed = ?1 WHERE id = ?2",
            rusqlite::params![past, memory_id],
        )
        .unwrap();
    }
}

/// Insert an episodic memory with a hand-built episodic vector ≈0.95 cosine
/// from every other one built the same way (all share the dominant axis).
pub fn seed_episodic_cluster_member(
    conn: &Connection,
    id: &str,
    user: &str,
    content: &str,
    secondary_axis: usize,
) {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO memories (id, user_id, session_id, content, primary_sector, created_at, \
         last_accessed, strength, decay_rate) VALUES (?1, ?2, 's', ?3, 'episodic', ?4, ?4, 1.0, 0.03)",
        rusqlite::params![id, user, content, now],
    )
    .unwrap();

    let mut episodic = vec![0.0f32; EMBEDDING_DIM];
    episodic[0] = 0.95;
    episodic[secondary_axis] = (1.0f32 - 0.95 * 0.95).sqrt();

    let spike = |idx: usize| {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[idx] = 1.0;
        v
    };
    let embs = engram::embedding::SectorEmbeddings {
        episodic,
        semantic: spike(1),
        procedural: spike(2),
        emotional: spike(3),
        reflective: spike(4),
    };
    engram::memory::embeddings::store(conn, id, &embs, "default", EMBEDDING_DIM).unwrap();
}
