//! Memory repository — transactional CRUD over record, metadata, embeddings,
//! and links.
//!
//! [`create_memory`] runs the full write pipeline inside one transaction:
//! schema validation, id generation, per-sector embedding storage, waypoint
//! link creation (failures logged, never propagated), record + metadata
//! insert, and an audit log entry. Reads are tenant-scoped: every operation
//! takes a `user_id` and surfaces `NotFound` when it does not match.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::DecayConfig;
use crate::embedding::{EmbeddingProvider, SectorEmbeddings};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::types::{
    Memory, MemoryMetadata, MetadataPatch, Sector,
};
use crate::memory::{decay, embeddings, links};

/// How many semantic-sector neighbours are scored for waypoint links.
const LINK_CANDIDATE_LIMIT: usize = 8;

fn default_salience() -> f64 {
    0.5
}

/// Inputs to [`create_memory`]. Deserializes from the camelCase wire shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemoryRequest {
    pub content: String,
    pub user_id: String,
    pub session_id: String,
    pub primary_sector: Sector,
    #[serde(default = "default_salience")]
    pub salience: f64,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    /// Pre-generated vectors (import path); `None` calls the provider.
    #[serde(skip)]
    pub embeddings: Option<SectorEmbeddings>,
}

/// Result of a successful create.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemoryResult {
    pub id: String,
    pub created_at: String,
    pub strength: f64,
}

/// Partial update applied by [`update_memory`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateMemoryRequest {
    pub content: Option<String>,
    pub metadata: Option<MetadataPatch>,
    pub strength: Option<f64>,
    pub salience: Option<f64>,
}

/// Aggregated outcome of [`batch_delete`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<BatchDeleteFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteFailure {
    pub memory_id: String,
    pub error: String,
}

/// Full write path: validate → embed → insert record + metadata → store
/// vectors → build waypoint links → audit log, all in one transaction.
pub fn create_memory(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    request: &CreateMemoryRequest,
    decay_cfg: &DecayConfig,
    namespace: &str,
) -> MemoryResult<CreateMemoryResult> {
    // 1. Validate against the registered schema
    validate_create(request)?;

    // 2. Generate id
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    // 3. All five sector vectors, generated unless the caller supplied them
    let sector_embeddings = match &request.embeddings {
        Some(embs) => embs.clone(),
        None => provider
            .embed_all_sectors(&request.content)
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?,
    };

    let decay_rate = decay_cfg.effective_decay_rate(request.primary_sector);

    let tx = conn.transaction()?;

    // 4. Record + metadata
    tx.execute(
        "INSERT INTO memories (id, user_id, session_id, content, primary_sector, created_at, \
         last_accessed, access_count, strength, salience, decay_rate) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0, 1.0, ?7, ?8)",
        params![
            id,
            request.user_id,
            request.session_id,
            request.content,
            request.primary_sector.as_str(),
            now,
            request.salience,
            decay_rate,
        ],
    )?;
    insert_metadata(&tx, &id, &request.metadata)?;

    // 5. Embeddings, atomically with the record
    embeddings::store(
        &tx,
        &id,
        &sector_embeddings,
        namespace,
        provider.dimensions(),
    )?;

    // 6. Waypoint links — failures are logged, never propagated
    let seed = links::LinkSeed {
        id: id.clone(),
        created_at: now.clone(),
        content: request.content.clone(),
        keywords: request.metadata.keywords.clone(),
        tags: request.metadata.tags.clone(),
    };
    match link_candidates(&tx, &id, &request.user_id, &sector_embeddings, namespace) {
        Ok(candidates) => {
            if let Err(e) = links::create_waypoint_links(&tx, &seed, &candidates) {
                tracing::warn!(memory_id = %id, error = %e, "waypoint link creation failed");
            }
        }
        Err(e) => {
            tracing::warn!(memory_id = %id, error = %e, "waypoint candidate lookup failed");
        }
    }

    // 7. Audit log and commit
    write_audit_log(&tx, "create", &id, None)?;
    tx.commit()?;

    Ok(CreateMemoryResult {
        id,
        created_at: now,
        strength: 1.0,
    })
}

/// Fetch a memory with metadata and incident links.
///
/// Returns `Ok(None)` when the id does not exist, `NotFound` when it exists
/// under a different user. A successful read counts as an access and is
/// reinforced via the decay engine.
pub fn get_memory(
    conn: &mut Connection,
    memory_id: &str,
    user_id: &str,
    decay_cfg: &DecayConfig,
) -> MemoryResult<Option<Memory>> {
    let Some(mut memory) = read_memory(conn, memory_id)? else {
        return Ok(None);
    };
    if memory.user_id != user_id {
        return Err(MemoryError::NotFound {
            id: memory_id.to_string(),
        });
    }

    memory.links = links::links_for_memory(conn, memory_id)?;

    // Access tracking and reinforcement, delegated to the decay engine.
    let event = decay::auto_reinforce_on_access(conn, memory_id, decay_cfg)?;
    memory.strength = event.strength_after;
    memory.access_count += 1;
    memory.last_accessed = event.created_at;

    Ok(Some(memory))
}

/// Apply a partial update. Content changes regenerate embeddings and rebuild
/// links; strength/salience-only changes touch nothing else; an all-absent
/// metadata patch performs no metadata SQL.
pub fn update_memory(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    memory_id: &str,
    user_id: &str,
    request: &UpdateMemoryRequest,
    namespace: &str,
) -> MemoryResult<Memory> {
    validate_update(request)?;

    let current = read_memory(conn, memory_id)?.ok_or_else(|| MemoryError::NotFound {
        id: memory_id.to_string(),
    })?;
    if current.user_id != user_id {
        return Err(MemoryError::NotFound {
            id: memory_id.to_string(),
        });
    }

    let content_changed = request
        .content
        .as_deref()
        .is_some_and(|c| c != current.content);

    // Re-embed outside the transaction; providers are slow.
    let new_embeddings = if content_changed {
        let content = request.content.as_deref().expect("checked above");
        Some(
            provider
                .embed_all_sectors(content)
                .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?,
        )
    } else {
        None
    };

    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    if let Some(content) = &request.content {
        tx.execute(
            "UPDATE memories SET content = ?1 WHERE id = ?2",
            params![content, memory_id],
        )?;
    }
    if let Some(strength) = request.strength {
        tx.execute(
            "UPDATE memories SET strength = ?1 WHERE id = ?2",
            params![strength, memory_id],
        )?;
    }
    if let Some(salience) = request.salience {
        tx.execute(
            "UPDATE memories SET salience = ?1 WHERE id = ?2",
            params![salience, memory_id],
        )?;
    }

    // Metadata: an all-absent patch is a no-op and issues zero SQL.
    let merged_metadata = match &request.metadata {
        Some(patch) if !patch.is_empty() => {
            let merged = patch.apply(&current.metadata);
            insert_metadata(&tx, memory_id, &merged)?;
            merged
        }
        _ => current.metadata.clone(),
    };

    if content_changed {
        let sector_embeddings = new_embeddings.expect("embedded above");
        embeddings::store(
            &tx,
            memory_id,
            &sector_embeddings,
            namespace,
            provider.dimensions(),
        )?;

        // Rebuild links: delete-then-create against fresh candidates.
        links::delete_links_for_memory(&tx, memory_id)?;
        let seed = links::LinkSeed {
            id: memory_id.to_string(),
            created_at: current.created_at.clone(),
            content: request.content.clone().expect("checked above"),
            keywords: merged_metadata.keywords.clone(),
            tags: merged_metadata.tags.clone(),
        };
        match link_candidates(&tx, memory_id, user_id, &sector_embeddings, namespace) {
            Ok(candidates) => {
                if let Err(e) = links::create_waypoint_links(&tx, &seed, &candidates) {
                    tracing::warn!(memory_id, error = %e, "waypoint rebuild failed");
                }
            }
            Err(e) => {
                tracing::warn!(memory_id, error = %e, "waypoint candidate lookup failed");
            }
        }
    }

    write_audit_log(
        &tx,
        "update",
        memory_id,
        Some(&serde_json::json!({
            "content_changed": content_changed,
            "at": now,
        })),
    )?;
    tx.commit()?;

    let mut updated = read_memory(conn, memory_id)?.ok_or_else(|| MemoryError::NotFound {
        id: memory_id.to_string(),
    })?;
    updated.links = links::links_for_memory(conn, memory_id)?;
    Ok(updated)
}

/// Soft delete: strength drops to 0; the record and its graph stay in place.
pub fn soft_delete(conn: &mut Connection, memory_id: &str, user_id: &str) -> MemoryResult<()> {
    let tx = conn.transaction()?;
    ensure_owned(&tx, memory_id, user_id)?;
    tx.execute(
        "UPDATE memories SET strength = 0.0 WHERE id = ?1",
        params![memory_id],
    )?;
    write_audit_log(
        &tx,
        "delete",
        memory_id,
        Some(&serde_json::json!({"soft": true})),
    )?;
    tx.commit()?;
    Ok(())
}

/// Hard delete: removes the record and cascades embeddings, metadata, links,
/// and reinforcement history.
pub fn hard_delete(
    conn: &mut Connection,
    memory_id: &str,
    user_id: &str,
    namespace: &str,
) -> MemoryResult<()> {
    let tx = conn.transaction()?;
    ensure_owned(&tx, memory_id, user_id)?;

    embeddings::delete(&tx, memory_id, namespace)?;
    write_audit_log(
        &tx,
        "delete",
        memory_id,
        Some(&serde_json::json!({"soft": false})),
    )?;
    // Cascades metadata, links, and reinforcement history via FK.
    tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;

    tx.commit()?;
    Ok(())
}

/// Delete many ids; each id succeeds or fails independently.
///
/// Missing ids are reported as failures with the message `"Memory not found"`.
pub fn batch_delete(
    conn: &mut Connection,
    memory_ids: &[String],
    user_id: &str,
    namespace: &str,
) -> MemoryResult<BatchDeleteResult> {
    let mut result = BatchDeleteResult {
        success_count: 0,
        failure_count: 0,
        failures: Vec::new(),
    };

    for memory_id in memory_ids {
        match hard_delete(conn, memory_id, user_id, namespace) {
            Ok(()) => result.success_count += 1,
            Err(MemoryError::NotFound { .. }) => {
                result.failure_count += 1;
                result.failures.push(BatchDeleteFailure {
                    memory_id: memory_id.clone(),
                    error: "Memory not found".to_string(),
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok(result)
}

// ── Shared row access ────────────────────────────────────────────────────────

const MEMORY_COLUMNS: &str = "m.id, m.user_id, m.session_id, m.content, m.primary_sector, \
    m.created_at, m.last_accessed, m.access_count, m.strength, m.salience, m.decay_rate, \
    md.keywords, md.tags, md.category, md.context, md.importance, md.is_atomic, md.parent_ids";

/// Read a single memory with metadata (no links, no access tracking).
pub fn read_memory(conn: &Connection, memory_id: &str) -> MemoryResult<Option<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories m \
         LEFT JOIN memory_metadata md ON md.memory_id = m.id WHERE m.id = ?1"
    );
    let memory = conn
        .query_row(&sql, params![memory_id], map_memory_row)
        .optional()?;
    Ok(memory)
}

/// Batch-fetch memories with metadata, keyed by id.
pub fn fetch_memories(
    conn: &Connection,
    memory_ids: &[&str],
) -> MemoryResult<HashMap<String, Memory>> {
    if memory_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=memory_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories m \
         LEFT JOIN memory_metadata md ON md.memory_id = m.id \
         WHERE m.id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::types::ToSql> = memory_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params_vec.as_slice(), map_memory_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|m| (m.id.clone(), m)).collect())
}

fn map_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let sector: String = row.get(4)?;
    let keywords: Option<String> = row.get(11)?;
    let tags: Option<String> = row.get(12)?;
    let parent_ids: Option<String> = row.get(17)?;
    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        content: row.get(3)?,
        primary_sector: sector.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: row.get(5)?,
        last_accessed: row.get(6)?,
        access_count: row.get(7)?,
        strength: row.get(8)?,
        salience: row.get(9)?,
        decay_rate: row.get(10)?,
        metadata: MemoryMetadata {
            keywords: parse_string_array(keywords.as_deref()),
            tags: parse_string_array(tags.as_deref()),
            category: row.get(13)?,
            context: row.get(14)?,
            importance: row.get(15)?,
            is_atomic: row.get::<_, Option<bool>>(16)?.unwrap_or(true),
            parent_ids: parse_string_array(parent_ids.as_deref()),
        },
        links: Vec::new(),
    })
}

fn parse_string_array(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Upsert the metadata sidecar row.
fn insert_metadata(
    conn: &Connection,
    memory_id: &str,
    metadata: &MemoryMetadata,
) -> MemoryResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO memory_metadata \
         (memory_id, keywords, tags, category, context, importance, is_atomic, parent_ids) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            memory_id,
            serde_json::to_string(&metadata.keywords)?,
            serde_json::to_string(&metadata.tags)?,
            metadata.category,
            metadata.context,
            metadata.importance,
            metadata.is_atomic,
            serde_json::to_string(&metadata.parent_ids)?,
        ],
    )?;
    Ok(())
}

/// Fail with `NotFound` unless the memory exists and belongs to the user.
fn ensure_owned(conn: &Connection, memory_id: &str, user_id: &str) -> MemoryResult<()> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM memories WHERE id = ?1",
            params![memory_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        Some(owner) if owner == user_id => Ok(()),
        _ => Err(MemoryError::NotFound {
            id: memory_id.to_string(),
        }),
    }
}

/// Semantic-sector KNN neighbours of a freshly written memory, hydrated with
/// the fields the link heuristics need. Scoped to the same user.
fn link_candidates(
    tx: &Transaction,
    memory_id: &str,
    user_id: &str,
    sector_embeddings: &SectorEmbeddings,
    namespace: &str,
) -> MemoryResult<Vec<links::LinkCandidate>> {
    let hits = embeddings::vector_similarity_search(
        tx,
        sector_embeddings.get(Sector::Semantic),
        Sector::Semantic,
        LINK_CANDIDATE_LIMIT + 1, // the new memory itself is in the index
        0.0,
        namespace,
    )?;

    let ids: Vec<&str> = hits
        .iter()
        .filter(|h| h.memory_id != memory_id)
        .map(|h| h.memory_id.as_str())
        .collect();
    let records = fetch_memories(tx, &ids)?;

    Ok(hits
        .into_iter()
        .filter(|h| h.memory_id != memory_id)
        .filter_map(|hit| {
            let record = records.get(&hit.memory_id)?;
            if record.user_id != user_id {
                return None;
            }
            Some(links::LinkCandidate {
                id: record.id.clone(),
                created_at: record.created_at.clone(),
                content: record.content.clone(),
                keywords: record.metadata.keywords.clone(),
                tags: record.metadata.tags.clone(),
                semantic_similarity: hit.similarity,
            })
        })
        .collect())
}

/// Write an entry to the memory_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    memory_id: &str,
    details: Option<&serde_json::Value>,
) -> MemoryResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details_json, now],
    )?;
    Ok(())
}

// ── Schema validation ────────────────────────────────────────────────────────

fn validate_create(request: &CreateMemoryRequest) -> MemoryResult<()> {
    let value = serde_json::json!({
        "content": request.content,
        "userId": request.user_id,
        "sessionId": request.session_id,
        "primarySector": request.primary_sector.as_str(),
        "salience": request.salience,
    });
    crate::validation::check("memory.create", &value)
        .map_err(|field_errors| MemoryError::Validation { field_errors })
}

fn validate_update(request: &UpdateMemoryRequest) -> MemoryResult<()> {
    let mut value = serde_json::Map::new();
    if let Some(content) = &request.content {
        value.insert("content".into(), serde_json::json!(content));
    }
    if let Some(strength) = request.strength {
        value.insert("strength".into(), serde_json::json!(strength));
    }
    if let Some(salience) = request.salience {
        value.insert("salience".into(), serde_json::json!(salience));
    }
    crate::validation::check("memory.update", &serde_json::Value::Object(value))
        .map_err(|field_errors| MemoryError::Validation { field_errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::EMBEDDING_DIM;

    /// Deterministic provider: unit spike at a position derived from the text.
    pub(crate) struct SpikeProvider;

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

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn create_request(content: &str, user: &str) -> CreateMemoryRequest {
        CreateMemoryRequest {
            content: content.into(),
            user_id: user.into(),
            session_id: "session-1".into(),
            primary_sector: Sector::Episodic,
            salience: 0.5,
            metadata: MemoryMetadata::default(),
            embeddings: None,
        }
    }

    #[test]
    fn create_inserts_record_metadata_and_vectors() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();

        let result =
            create_memory(&mut conn, &SpikeProvider, &create_request("first memory", "u1"), &cfg, "default")
                .unwrap();
        assert!((result.strength - 1.0).abs() < 1e-12);

        let memory = read_memory(&conn, &result.id).unwrap().unwrap();
        assert_eq!(memory.content, "first memory");
        assert_eq!(memory.user_id, "u1");
        assert_eq!(memory.access_count, 0);
        assert!((memory.decay_rate - 0.03).abs() < 1e-12);

        let embs = embeddings::retrieve(&conn, &result.id, "default").unwrap();
        assert!(embs.is_some());

        let log_op: String = conn
            .query_row(
                "SELECT operation FROM memory_log WHERE memory_id = ?1",
                params![result.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(log_op, "create");
    }

    #[test]
    fn create_rejects_empty_content() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();

        let err = create_memory(&mut conn, &SpikeProvider, &create_request("", "u1"), &cfg, "default")
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[test]
    fn create_rejects_empty_user() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();

        let err = create_memory(&mut conn, &SpikeProvider, &create_request("content", ""), &cfg, "default")
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[test]
    fn get_returns_none_for_missing_id() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        assert!(get_memory(&mut conn, "nope", "u1", &cfg).unwrap().is_none());
    }

    #[test]
    fn get_fails_not_found_on_user_mismatch() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("mine", "u1"), &cfg, "default")
            .unwrap()
            .id;

        let err = get_memory(&mut conn, &id, "intruder", &cfg).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[test]
    fn get_counts_as_access() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("tracked", "u1"), &cfg, "default")
            .unwrap()
            .id;

        let memory = get_memory(&mut conn, &id, "u1", &cfg).unwrap().unwrap();
        assert_eq!(memory.access_count, 1);

        let db_count: u32 = conn
            .query_row(
                "SELECT access_count FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(db_count, 1);

        let history_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memory_reinforcement_history WHERE memory_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(history_rows, 1);
    }

    #[test]
    fn update_strength_only_keeps_embeddings() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("stable", "u1"), &cfg, "default")
            .unwrap()
            .id;
        let before = embeddings::retrieve(&conn, &id, "default").unwrap().unwrap();

        let request = UpdateMemoryRequest {
            strength: Some(0.4),
            ..UpdateMemoryRequest::default()
        };
        let updated = update_memory(&mut conn, &SpikeProvider, &id, "u1", &request, "default").unwrap();
        assert!((updated.strength - 0.4).abs() < 1e-12);

        let after = embeddings::retrieve(&conn, &id, "default").unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn update_content_regenerates_embeddings_and_links() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("original words", "u1"), &cfg, "default")
            .unwrap()
            .id;
        let before = embeddings::retrieve(&conn, &id, "default").unwrap().unwrap();

        let request = UpdateMemoryRequest {
            content: Some("completely different words".into()),
            ..UpdateMemoryRequest::default()
        };
        let updated = update_memory(&mut conn, &SpikeProvider, &id, "u1", &request, "default").unwrap();
        assert_eq!(updated.content, "completely different words");

        let after = embeddings::retrieve(&conn, &id, "default").unwrap().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn update_preserves_reinforcement_history_across_content_change() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("will change", "u1"), &cfg, "default")
            .unwrap()
            .id;
        get_memory(&mut conn, &id, "u1", &cfg).unwrap();

        let request = UpdateMemoryRequest {
            content: Some("changed now".into()),
            ..UpdateMemoryRequest::default()
        };
        update_memory(&mut conn, &SpikeProvider, &id, "u1", &request, "default").unwrap();

        let history = decay::get_reinforcement_history(&conn, &id).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn empty_metadata_patch_is_a_no_op() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let mut request = create_request("has metadata", "u1");
        request.metadata.tags = vec!["keep".into()];
        let id = create_memory(&mut conn, &SpikeProvider, &request, &cfg, "default")
            .unwrap()
            .id;

        let update = UpdateMemoryRequest {
            metadata: Some(MetadataPatch::default()),
            ..UpdateMemoryRequest::default()
        };
        let updated = update_memory(&mut conn, &SpikeProvider, &id, "u1", &update, "default").unwrap();
        assert_eq!(updated.metadata.tags, vec!["keep".to_string()]);
    }

    #[test]
    fn update_rejects_out_of_range_strength() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("bounded", "u1"), &cfg, "default")
            .unwrap()
            .id;

        let request = UpdateMemoryRequest {
            strength: Some(1.5),
            ..UpdateMemoryRequest::default()
        };
        let err = update_memory(&mut conn, &SpikeProvider, &id, "u1", &request, "default").unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[test]
    fn soft_delete_zeroes_strength() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("fading", "u1"), &cfg, "default")
            .unwrap()
            .id;

        soft_delete(&mut conn, &id, "u1").unwrap();

        let strength: f64 = conn
            .query_row(
                "SELECT strength FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(strength, 0.0);
    }

    #[test]
    fn hard_delete_cascades_everything() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("doomed", "u1"), &cfg, "default")
            .unwrap()
            .id;
        get_memory(&mut conn, &id, "u1", &cfg).unwrap(); // seed history

        hard_delete(&mut conn, &id, "u1", "default").unwrap();

        for (table, column) in [
            ("memories", "id"),
            ("memory_metadata", "memory_id"),
            ("memory_reinforcement_history", "memory_id"),
        ] {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
                    params![id],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 0, "{table} not cleaned");
        }
        assert!(embeddings::retrieve(&conn, &id, "default").unwrap().is_none());
    }

    #[test]
    fn batch_delete_reports_mixed_outcomes() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();
        let id = create_memory(&mut conn, &SpikeProvider, &create_request("kept briefly", "u1"), &cfg, "default")
            .unwrap()
            .id;

        let result = batch_delete(
            &mut conn,
            &[id.clone(), "missing-id".to_string()],
            "u1",
            "default",
        )
        .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.failures[0].memory_id, "missing-id");
        assert_eq!(result.failures[0].error, "Memory not found");
    }

    #[test]
    fn waypoint_links_appear_between_similar_memories() {
        let mut conn = test_db();
        let cfg = DecayConfig::default();

        // Identical content ⇒ identical semantic vectors ⇒ similarity 1.0.
        let first = create_memory(
            &mut conn,
            &SpikeProvider,
            &create_request("shared thought", "u1"),
            &cfg,
            "default",
        )
        .unwrap()
        .id;
        let second = create_memory(
            &mut conn,
            &SpikeProvider,
            &create_request("shared thought", "u1"),
            &cfg,
            "default",
        )
        .unwrap()
        .id;

        let incident = links::links_for_memory(&conn, &second).unwrap();
        assert!(incident
            .iter()
            .any(|l| l.source_id == second && l.target_id == first));
    }
}
