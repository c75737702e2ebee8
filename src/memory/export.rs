//! Versioned export/import with schema validation and merge/replace
//! semantics.
//!
//! Exports are self-describing JSON envelopes (`version`, `exported_at`,
//! filter, count, memories with all five sector vectors and outgoing links).
//! Import validates the whole document before touching storage, then either
//! replaces the user's memories wholesale or merges by id. The round trip
//! `import(export(m))` preserves records, metadata, embeddings, and links.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DecayConfig;
use crate::embedding::{EmbeddingProvider, SectorEmbeddings};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::store::write_audit_log;
use crate::memory::types::{MemoryMetadata, Sector, WaypointLink};
use crate::memory::{embeddings, links, store};
use crate::validation::{FieldError, FieldErrorCode};

/// Current export format version (semver). Imports accept the same major.
pub const EXPORT_VERSION: &str = "1.0.0";

/// Filter applied at export time and echoed into the envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportFilter {
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub sectors: Vec<Sector>,
    pub tags: Vec<String>,
    pub min_strength: Option<f64>,
}

/// One exported memory. `embeddings` is keyed by sector name; `tags` mirrors
/// `metadata.tags` for toolability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedMemory {
    pub id: String,
    pub content: String,
    pub primary_sector: Sector,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    #[serde(default)]
    pub embeddings: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
    pub last_accessed: String,
    pub strength: f64,
    pub salience: f64,
    pub access_count: u32,
    #[serde(default)]
    pub links: Vec<WaypointLink>,
}

/// The export envelope. Unknown keys are rejected on import.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: String,
    pub user_id: String,
    pub exported_at: String,
    pub filter: ExportFilter,
    pub count: usize,
    pub memories: Vec<ExportedMemory>,
}

/// Import behaviour for colliding ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    Merge,
    Replace,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
        }
    }
}

/// Options accepted by [`import_memories`].
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub mode: ImportMode,
    pub regenerate_embeddings: bool,
}

/// Result of an import run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<ImportError>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub memory_id: String,
    pub error: String,
}

/// Outcome of [`validate_import`] — storage is never touched.
#[derive(Debug, Serialize)]
pub struct ImportValidation {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

// ── Export ───────────────────────────────────────────────────────────────────

/// Export a user's memories matching the filter. Memories are ordered by id
/// so the same store always yields the same document.
pub fn export_memories(
    conn: &Connection,
    user_id: &str,
    filter: &ExportFilter,
    namespace: &str,
) -> MemoryResult<ExportEnvelope> {
    let ids = matching_ids(conn, user_id, filter)?;
    let records = store::fetch_memories(conn, &ids.iter().map(|s| s.as_str()).collect::<Vec<_>>())?;

    let mut memories = Vec::with_capacity(ids.len());
    for id in &ids {
        let Some(memory) = records.get(id) else {
            continue;
        };
        // Tag filter is an array overlap, applied post-fetch.
        if !filter.tags.is_empty()
            && !memory
                .metadata
                .tags
                .iter()
                .any(|t| filter.tags.iter().any(|f| f.eq_ignore_ascii_case(t)))
        {
            continue;
        }

        let Some(sector_embeddings) = embeddings::retrieve(conn, id, namespace)? else {
            tracing::warn!(memory_id = %id, "memory has no embeddings, skipping export");
            continue;
        };
        let mut embedding_map = BTreeMap::new();
        for (sector, vector) in sector_embeddings.iter() {
            embedding_map.insert(sector.as_str().to_string(), vector.to_vec());
        }

        // Outgoing edges only, so each edge appears exactly once per document.
        let outgoing: Vec<WaypointLink> = links::links_for_memory(conn, id)?
            .into_iter()
            .filter(|l| l.source_id == *id)
            .collect();

        memories.push(ExportedMemory {
            id: memory.id.clone(),
            content: memory.content.clone(),
            primary_sector: memory.primary_sector,
            metadata: memory.metadata.clone(),
            embeddings: embedding_map,
            tags: memory.metadata.tags.clone(),
            created_at: memory.created_at.clone(),
            last_accessed: memory.last_accessed.clone(),
            strength: memory.strength,
            salience: memory.salience,
            access_count: memory.access_count,
            links: outgoing,
        });
    }

    Ok(ExportEnvelope {
        version: EXPORT_VERSION.to_string(),
        user_id: user_id.to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        filter: filter.clone(),
        count: memories.len(),
        memories,
    })
}

fn matching_ids(
    conn: &Connection,
    user_id: &str,
    filter: &ExportFilter,
) -> MemoryResult<Vec<String>> {
    let mut sql = String::from("SELECT id FROM memories WHERE user_id = ?1");
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user_id.to_string())];

    if let Some(after) = &filter.created_after {
        args.push(Box::new(after.clone()));
        sql.push_str(&format!(" AND created_at >= ?{}", args.len()));
    }
    if let Some(before) = &filter.created_before {
        args.push(Box::new(before.clone()));
        sql.push_str(&format!(" AND created_at <= ?{}", args.len()));
    }
    if let Some(min_strength) = filter.min_strength {
        args.push(Box::new(min_strength));
        sql.push_str(&format!(" AND strength >= ?{}", args.len()));
    }
    if !filter.sectors.is_empty() {
        let placeholders: Vec<String> = filter
            .sectors
            .iter()
            .map(|s| {
                args.push(Box::new(s.as_str().to_string()));
                format!("?{}", args.len())
            })
            .collect();
        sql.push_str(&format!(" AND primary_sector IN ({})", placeholders.join(", ")));
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|b| b.as_ref()).collect();
    let ids = stmt
        .query_map(params_ref.as_slice(), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

// ── Validation ───────────────────────────────────────────────────────────────

const KNOWN_TOP_LEVEL_KEYS: [&str; 6] =
    ["version", "userId", "exportedAt", "filter", "count", "memories"];

/// Validate an import document without touching storage.
///
/// Checks top-level shape, version compatibility, per-memory required fields,
/// and the five-sector embedding map (unless embeddings will be regenerated).
pub fn validate_import(data: &serde_json::Value, regenerate_embeddings: bool) -> ImportValidation {
    let mut errors: Vec<FieldError> = Vec::new();

    let Some(object) = data.as_object() else {
        errors.push(FieldError::simple(
            FieldErrorCode::TypeMismatch,
            "",
            "import document must be a JSON object",
        ));
        return ImportValidation {
            valid: false,
            errors,
        };
    };

    for key in object.keys() {
        if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            errors.push(FieldError::simple(
                FieldErrorCode::CustomValidationFailed,
                key,
                format!("unknown top-level key: {key}"),
            ));
        }
    }

    match object.get("version").and_then(|v| v.as_str()) {
        None => errors.push(FieldError::simple(
            FieldErrorCode::FieldRequired,
            "version",
            "version is required",
        )),
        Some(version) => {
            let major = version.split('.').next().unwrap_or("");
            let expected_major = EXPORT_VERSION.split('.').next().unwrap_or("");
            if major != expected_major {
                errors.push(FieldError::simple(
                    FieldErrorCode::CustomValidationFailed,
                    "version",
                    format!("unsupported version {version}, expected {expected_major}.x"),
                ));
            }
        }
    }

    let Some(memories) = object.get("memories").and_then(|v| v.as_array()) else {
        errors.push(FieldError::simple(
            FieldErrorCode::FieldRequired,
            "memories",
            "memories array is required",
        ));
        return ImportValidation {
            valid: errors.is_empty(),
            errors,
        };
    };

    for (index, memory) in memories.iter().enumerate() {
        validate_memory_entry(memory, index, regenerate_embeddings, &mut errors);
    }

    ImportValidation {
        valid: errors.is_empty(),
        errors,
    }
}

fn validate_memory_entry(
    memory: &serde_json::Value,
    index: usize,
    regenerate_embeddings: bool,
    errors: &mut Vec<FieldError>,
) {
    let path = |field: &str| format!("memories[{index}].{field}");

    let Some(object) = memory.as_object() else {
        errors.push(FieldError::simple(
            FieldErrorCode::TypeMismatch,
            format!("memories[{index}]"),
            "memory entry must be an object",
        ));
        return;
    };

    for field in ["id", "content"] {
        if object.get(field).and_then(|v| v.as_str()).is_none_or(str::is_empty) {
            errors.push(FieldError::simple(
                FieldErrorCode::FieldRequired,
                path(field),
                format!("{field} is required"),
            ));
        }
    }

    match object.get("primarySector").and_then(|v| v.as_str()) {
        Some(sector) if sector.parse::<Sector>().is_ok() => {}
        Some(sector) => errors.push(FieldError::simple(
            FieldErrorCode::InvalidEnumValue,
            path("primarySector"),
            format!("unknown sector: {sector}"),
        )),
        None => errors.push(FieldError::simple(
            FieldErrorCode::FieldRequired,
            path("primarySector"),
            "primarySector is required",
        )),
    }

    if regenerate_embeddings {
        return;
    }

    let Some(embedding_map) = object.get("embeddings").and_then(|v| v.as_object()) else {
        errors.push(FieldError::simple(
            FieldErrorCode::FieldRequired,
            path("embeddings"),
            "embeddings map is required unless regenerateEmbeddings is set",
        ));
        return;
    };

    let mut expected_len: Option<usize> = None;
    for sector in Sector::ALL {
        match embedding_map.get(sector.as_str()).and_then(|v| v.as_array()) {
            None => errors.push(FieldError::simple(
                FieldErrorCode::FieldRequired,
                path(&format!("embeddings.{sector}")),
                format!("missing {sector} vector"),
            )),
            Some(vector) => {
                let len = vector.len();
                if len == 0 {
                    errors.push(FieldError::simple(
                        FieldErrorCode::ArrayItemInvalid,
                        path(&format!("embeddings.{sector}")),
                        format!("{sector} vector is empty"),
                    ));
                } else if *expected_len.get_or_insert(len) != len {
                    errors.push(FieldError::simple(
                        FieldErrorCode::ArrayItemInvalid,
                        path(&format!("embeddings.{sector}")),
                        format!("{sector} vector length {len} differs from the others"),
                    ));
                }
            }
        }
    }
}

// ── Import ───────────────────────────────────────────────────────────────────

/// Import an export document for a user.
///
/// `replace` hard-deletes the user's memories first; `merge` upserts by id
/// (existing ids receive metadata, strength, and salience from the import).
/// Per-memory failures are collected; a top-level validation failure aborts
/// before any write.
pub fn import_memories(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    user_id: &str,
    data: &serde_json::Value,
    options: ImportOptions,
    decay_cfg: &DecayConfig,
    namespace: &str,
) -> MemoryResult<ImportReport> {
    let validation = validate_import(data, options.regenerate_embeddings);
    if !validation.valid {
        return Err(MemoryError::Validation {
            field_errors: validation.errors,
        });
    }

    let envelope: ExportEnvelope = serde_json::from_value(data.clone())
        .map_err(|e| MemoryError::validation(FieldError::simple(
            FieldErrorCode::TypeMismatch,
            "",
            format!("document does not match the export schema: {e}"),
        )))?;

    if options.mode == ImportMode::Replace {
        delete_all_for_user(conn, user_id, namespace)?;
    }

    let mut report = ImportReport {
        imported_count: 0,
        skipped_count: 0,
        error_count: 0,
        errors: Vec::new(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    // Pass 1: records, metadata, embeddings.
    for memory in &envelope.memories {
        match import_one(conn, provider, user_id, memory, &options, decay_cfg, namespace) {
            Ok(ImportOutcome::Written) => report.imported_count += 1,
            Ok(ImportOutcome::Skipped) => report.skipped_count += 1,
            Err(e) => {
                report.error_count += 1;
                report.errors.push(ImportError {
                    memory_id: memory.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    // Pass 2: links, once every endpoint exists.
    let now = chrono::Utc::now().to_rfc3339();
    for memory in &envelope.memories {
        for link in &memory.links {
            let both_exist: bool = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM memories WHERE id = ?1) > 0 \
                   AND (SELECT COUNT(*) FROM memories WHERE id = ?2) > 0",
                params![link.source_id, link.target_id],
                |row| row.get(0),
            )?;
            if !both_exist {
                continue;
            }
            conn.execute(
                "INSERT OR IGNORE INTO memory_links (source_id, target_id, link_type, weight, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    link.source_id,
                    link.target_id,
                    link.link_type.as_str(),
                    link.weight,
                    if link.created_at.is_empty() { &now } else { &link.created_at },
                ],
            )?;
        }
    }

    Ok(report)
}

enum ImportOutcome {
    Written,
    Skipped,
}

fn import_one(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    user_id: &str,
    memory: &ExportedMemory,
    options: &ImportOptions,
    decay_cfg: &DecayConfig,
    namespace: &str,
) -> MemoryResult<ImportOutcome> {
    let existing_owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM memories WHERE id = ?1",
            params![memory.id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let sector_embeddings = if options.regenerate_embeddings {
        provider
            .embed_all_sectors(&memory.content)
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?
    } else {
        embeddings_from_map(&memory.embeddings)?
    };

    let tx = conn.transaction()?;
    let outcome = match existing_owner {
        Some(owner) if owner != user_id => {
            // A foreign memory holds this id; leave it alone.
            ImportOutcome::Skipped
        }
        Some(_) => {
            // Merge: existing ids receive metadata, strength, salience.
            tx.execute(
                "UPDATE memories SET strength = ?1, salience = ?2 WHERE id = ?3",
                params![memory.strength, memory.salience, memory.id],
            )?;
            upsert_metadata(&tx, &memory.id, &memory.metadata)?;
            write_audit_log(
                &tx,
                "import",
                &memory.id,
                Some(&serde_json::json!({"merged": true})),
            )?;
            ImportOutcome::Written
        }
        None => {
            tx.execute(
                "INSERT INTO memories (id, user_id, session_id, content, primary_sector, \
                 created_at, last_accessed, access_count, strength, salience, decay_rate) \
                 VALUES (?1, ?2, 'import', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    memory.id,
                    user_id,
                    memory.content,
                    memory.primary_sector.as_str(),
                    memory.created_at,
                    memory.last_accessed,
                    memory.access_count,
                    memory.strength,
                    memory.salience,
                    decay_cfg.effective_decay_rate(memory.primary_sector),
                ],
            )?;
            upsert_metadata(&tx, &memory.id, &memory.metadata)?;
            embeddings::store(
                &tx,
                &memory.id,
                &sector_embeddings,
                namespace,
                sector_embeddings.episodic.len(),
            )?;
            write_audit_log(
                &tx,
                "import",
                &memory.id,
                Some(&serde_json::json!({"merged": false})),
            )?;
            ImportOutcome::Written
        }
    };
    tx.commit()?;
    Ok(outcome)
}

fn upsert_metadata(
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

fn embeddings_from_map(map: &BTreeMap<String, Vec<f32>>) -> MemoryResult<SectorEmbeddings> {
    let get = |sector: Sector| -> MemoryResult<Vec<f32>> {
        map.get(sector.as_str()).cloned().ok_or_else(|| {
            MemoryError::StorageFailed(format!("missing {sector} vector"))
        })
    };
    Ok(SectorEmbeddings {
        episodic: get(Sector::Episodic)?,
        semantic: get(Sector::Semantic)?,
        procedural: get(Sector::Procedural)?,
        emotional: get(Sector::Emotional)?,
        reflective: get(Sector::Reflective)?,
    })
}

/// Hard-delete every memory of a user in one transaction (replace mode).
fn delete_all_for_user(
    conn: &mut Connection,
    user_id: &str,
    namespace: &str,
) -> MemoryResult<()> {
    let ids: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id FROM memories WHERE user_id = ?1")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let tx = conn.transaction()?;
    for id in &ids {
        embeddings::delete(&tx, id, namespace)?;
        tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    }
    tx.commit()?;
    tracing::info!(user_id, count = ids.len(), "replace import cleared user memories");
    Ok(())
}
