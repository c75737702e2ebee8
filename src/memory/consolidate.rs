//! Consolidation engine — clusters near-duplicate episodic memories into
//! semantic summaries.
//!
//! Clustering is greedy and deterministic: episodic memories are scanned in
//! id order, and each unvisited seed gathers every other unvisited memory
//! whose episodic-sector cosine similarity clears the threshold. Qualifying
//! clusters are summarised into a new semantic-sector memory whose
//! `parent_ids` records the sources; the sources are weakened by
//! `strength_reduction_factor`, never deleted.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::{ConsolidationConfig, DecayConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::store::write_audit_log;
use crate::memory::types::Sector;
use crate::memory::{bytes_to_embedding, cosine_similarity, embeddings, CancelToken};

/// One episodic memory eligible for clustering.
#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub id: String,
    pub content: String,
    pub access_count: u32,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
}

/// One consolidated cluster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationOutcome {
    pub summary_id: String,
    pub consolidated_ids: Vec<String>,
    pub summary_content: String,
    pub consolidated_at: String,
}

/// Aggregated result of a consolidation run.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub results: Vec<ConsolidationOutcome>,
    pub clusters_processed: usize,
    pub total_consolidated: usize,
    pub errors: Vec<String>,
}

/// Progress callback: `(clusters_consolidated, memories_processed)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize);

/// Find clusters of episodic memories for a user.
///
/// Soft-deleted memories (strength 0) are excluded unless the config says
/// otherwise. Members are scanned in id order so the same data always yields
/// the same clusters.
pub fn identify_clusters(
    conn: &Connection,
    user_id: &str,
    cfg: &ConsolidationConfig,
    namespace: &str,
) -> MemoryResult<Vec<Vec<ClusterMember>>> {
    let members = fetch_episodic_members(conn, user_id, cfg, namespace)?;

    let mut visited = vec![false; members.len()];
    let mut clusters = Vec::new();

    for seed_idx in 0..members.len() {
        if visited[seed_idx] {
            continue;
        }
        let mut cluster_indices = vec![seed_idx];
        for other_idx in (seed_idx + 1)..members.len() {
            if visited[other_idx] {
                continue;
            }
            let similarity = cosine_similarity(
                &members[seed_idx].embedding,
                &members[other_idx].embedding,
            );
            if similarity >= cfg.similarity_threshold {
                cluster_indices.push(other_idx);
            }
        }
        if cluster_indices.len() >= cfg.min_cluster_size {
            for &idx in &cluster_indices {
                visited[idx] = true;
            }
            clusters.push(
                cluster_indices
                    .into_iter()
                    .map(|idx| members[idx].clone())
                    .collect(),
            );
        }
    }

    Ok(clusters)
}

/// Consolidate the given clusters, `batch_size` clusters per transaction.
///
/// Each cluster runs under a savepoint: a failing cluster rolls back alone
/// and is reported in `errors`, the rest of the batch proceeds.
#[allow(clippy::too_many_arguments)]
pub fn consolidate_clusters(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    user_id: &str,
    clusters: &[Vec<ClusterMember>],
    cfg: &ConsolidationConfig,
    decay_cfg: &DecayConfig,
    namespace: &str,
    cancel: &CancelToken,
    progress: Option<ProgressFn<'_>>,
) -> MemoryResult<ConsolidationReport> {
    let mut report = ConsolidationReport::default();
    let mut progress = progress;

    for chunk in clusters.chunks(cfg.batch_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }

        // Embed every summary in the chunk before the transaction opens; the
        // provider is the slow part and must not run under the write lock.
        let mut prepared = Vec::with_capacity(chunk.len());
        for cluster in chunk {
            let summary_content = synthesise_summary(cluster);
            let sector_embeddings = provider
                .embed_all_sectors(&summary_content)
                .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;
            prepared.push((cluster, summary_content, sector_embeddings));
        }

        let mut tx = conn.transaction()?;
        for (cluster, summary_content, sector_embeddings) in prepared {
            let sp = tx.savepoint()?;
            match consolidate_one(
                &sp,
                provider,
                user_id,
                cluster,
                summary_content,
                &sector_embeddings,
                cfg,
                decay_cfg,
                namespace,
            ) {
                Ok(outcome) => {
                    sp.commit()?;
                    report.clusters_processed += 1;
                    report.total_consolidated += outcome.consolidated_ids.len();
                    report.results.push(outcome);
                }
                Err(e) => {
                    // Savepoint rolls back on drop; the cluster is skipped.
                    tracing::warn!(error = %e, "cluster consolidation failed");
                    report.errors.push(e.to_string());
                }
            }
            if let Some(cb) = progress.as_deref_mut() {
                cb(report.clusters_processed, report.total_consolidated);
            }
        }
        tx.commit()?;
    }

    Ok(report)
}

/// One-shot convenience: identify and consolidate in a single call.
pub fn consolidate(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    user_id: &str,
    cfg: &ConsolidationConfig,
    decay_cfg: &DecayConfig,
    namespace: &str,
    cancel: &CancelToken,
) -> MemoryResult<ConsolidationReport> {
    let clusters = identify_clusters(conn, user_id, cfg, namespace)?;
    consolidate_clusters(
        conn, provider, user_id, &clusters, cfg, decay_cfg, namespace, cancel, None,
    )
}

/// Deterministic summary text for a cluster: the most-accessed member's
/// content (ties broken by smallest id) prefixed with the member count.
pub fn synthesise_summary(cluster: &[ClusterMember]) -> String {
    let representative = cluster
        .iter()
        .max_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then_with(|| b.id.cmp(&a.id))
        })
        .expect("cluster is never empty");
    format!(
        "Consolidated from {} related episodes: {}",
        cluster.len(),
        representative.content
    )
}

#[allow(clippy::too_many_arguments)]
fn consolidate_one(
    conn: &Connection,
    provider: &dyn EmbeddingProvider,
    user_id: &str,
    cluster: &[ClusterMember],
    summary_content: String,
    sector_embeddings: &crate::embedding::SectorEmbeddings,
    cfg: &ConsolidationConfig,
    decay_cfg: &DecayConfig,
    namespace: &str,
) -> MemoryResult<ConsolidationOutcome> {
    let mut consolidated_ids: Vec<String> = cluster.iter().map(|m| m.id.clone()).collect();
    consolidated_ids.sort();

    let summary_id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    // Merged, deduplicated tags from the sources.
    let mut tags: Vec<String> = cluster.iter().flat_map(|m| m.tags.clone()).collect();
    tags.sort();
    tags.dedup();

    conn.execute(
        "INSERT INTO memories (id, user_id, session_id, content, primary_sector, created_at, \
         last_accessed, access_count, strength, salience, decay_rate) \
         VALUES (?1, ?2, 'consolidation', ?3, ?4, ?5, ?5, 0, 1.0, 0.5, ?6)",
        params![
            summary_id,
            user_id,
            summary_content,
            Sector::Semantic.as_str(),
            now,
            decay_cfg.effective_decay_rate(Sector::Semantic),
        ],
    )?;
    conn.execute(
        "INSERT INTO memory_metadata (memory_id, keywords, tags, is_atomic, parent_ids) \
         VALUES (?1, '[]', ?2, 0, ?3)",
        params![
            summary_id,
            serde_json::to_string(&tags)?,
            serde_json::to_string(&consolidated_ids)?,
        ],
    )?;
    embeddings::store(
        conn,
        &summary_id,
        sector_embeddings,
        namespace,
        provider.dimensions(),
    )?;

    // Sources are weakened, never deleted.
    for member_id in &consolidated_ids {
        conn.execute(
            "UPDATE memories SET strength = strength * ?1 WHERE id = ?2",
            params![cfg.strength_reduction_factor, member_id],
        )?;
    }

    write_audit_log(
        conn,
        "consolidate",
        &summary_id,
        Some(&serde_json::json!({
            "source_count": consolidated_ids.len(),
            "sources": consolidated_ids,
        })),
    )?;

    Ok(ConsolidationOutcome {
        summary_id,
        consolidated_ids,
        summary_content,
        consolidated_at: now,
    })
}

/// Episodic memories of a user with their episodic-sector vectors, id-ordered.
fn fetch_episodic_members(
    conn: &Connection,
    user_id: &str,
    cfg: &ConsolidationConfig,
    namespace: &str,
) -> MemoryResult<Vec<ClusterMember>> {
    let strength_floor = if cfg.include_soft_deleted { -1.0 } else { 0.0 };
    let mut stmt = conn.prepare(&format!(
        "SELECT m.id, m.content, m.access_count, md.tags, v.embedding \
         FROM memories m \
         LEFT JOIN memory_metadata md ON md.memory_id = m.id \
         JOIN {} v ON v.id = ?1 || '/' || m.id \
         WHERE m.primary_sector = 'episodic' AND m.user_id = ?2 AND m.strength > ?3 \
         ORDER BY m.id",
        crate::db::schema::vec_table_name(Sector::Episodic)
    ))?;

    let members = stmt
        .query_map(params![namespace, user_id, strength_floor], |row| {
            let tags: Option<String> = row.get(3)?;
            let bytes: Vec<u8> = row.get(4)?;
            Ok(ClusterMember {
                id: row.get(0)?,
                content: row.get(1)?,
                access_count: row.get(2)?,
                tags: tags
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default(),
                embedding: bytes_to_embedding(&bytes),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}
