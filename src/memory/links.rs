//! Waypoint graph builder — typed, weighted links between memories.
//!
//! For each candidate neighbour the builder scores four heuristics (semantic,
//! temporal, causal, analogical) and emits an edge for every score that
//! clears its per-type threshold. The graph may contain cycles; edges live in
//! the `memory_links` table keyed by `(source, target, link_type)`.

use rusqlite::{params, Connection};
use std::time::Instant;

use crate::error::MemoryResult;
use crate::memory::types::{LinkType, WaypointLink};

/// Minimum semantic-embedding cosine similarity for a `semantic` link.
const SEMANTIC_THRESHOLD: f64 = 0.75;
/// Minimum inverse-age-gap score for a `temporal` link (0.5 ⇒ within ~1 day).
const TEMPORAL_THRESHOLD: f64 = 0.5;
/// Minimum causal score (cue word + keyword overlap).
const CAUSAL_THRESHOLD: f64 = 0.6;
/// Minimum tag-overlap score for an `analogical` link.
const ANALOGICAL_THRESHOLD: f64 = 0.5;

/// Words whose presence marks a memory as describing cause or effect.
const CAUSAL_CUES: [&str; 6] = [
    "because",
    "therefore",
    "caused",
    "led to",
    "resulted in",
    "so that",
];

/// The memory links are created for.
#[derive(Debug, Clone)]
pub struct LinkSeed {
    pub id: String,
    pub created_at: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
}

/// A neighbour candidate, usually produced by a semantic-sector KNN query.
#[derive(Debug, Clone)]
pub struct LinkCandidate {
    pub id: String,
    pub created_at: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    /// Cosine similarity of the semantic-sector embeddings.
    pub semantic_similarity: f64,
}

/// Result of a waypoint-building pass.
#[derive(Debug)]
pub struct WaypointOutcome {
    pub links: Vec<WaypointLink>,
    pub processing_time_ms: u64,
}

/// Score all candidates against the seed memory and persist qualifying edges.
///
/// Runs inside the caller's transaction. Edge direction is seed → candidate;
/// an ordered pair carries at most one edge per link type.
pub fn create_waypoint_links(
    conn: &Connection,
    memory: &LinkSeed,
    candidates: &[LinkCandidate],
) -> MemoryResult<WaypointOutcome> {
    let started = Instant::now();
    let now = chrono::Utc::now().to_rfc3339();
    let mut links = Vec::new();

    for candidate in candidates {
        if candidate.id == memory.id {
            continue;
        }
        for (link_type, score) in score_candidate(memory, candidate) {
            let weight = score.clamp(0.0, 1.0);
            if weight <= 0.0 {
                continue;
            }
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO memory_links (source_id, target_id, link_type, weight, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![memory.id, candidate.id, link_type.as_str(), weight, now],
            )?;
            if inserted > 0 {
                links.push(WaypointLink {
                    source_id: memory.id.clone(),
                    target_id: candidate.id.clone(),
                    link_type,
                    weight,
                    created_at: now.clone(),
                });
            }
        }
    }

    Ok(WaypointOutcome {
        links,
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}

/// Remove every edge incident to a memory, in both directions.
pub fn delete_links_for_memory(conn: &Connection, memory_id: &str) -> MemoryResult<usize> {
    let removed = conn.execute(
        "DELETE FROM memory_links WHERE source_id = ?1 OR target_id = ?1",
        params![memory_id],
    )?;
    Ok(removed)
}

/// Fetch every edge incident to a memory, in both directions.
pub fn links_for_memory(conn: &Connection, memory_id: &str) -> MemoryResult<Vec<WaypointLink>> {
    let mut stmt = conn.prepare(
        "SELECT source_id, target_id, link_type, weight, created_at \
         FROM memory_links WHERE source_id = ?1 OR target_id = ?1 \
         ORDER BY source_id, target_id, link_type",
    )?;
    let links = stmt
        .query_map(params![memory_id], |row| {
            let link_type: String = row.get(2)?;
            Ok(WaypointLink {
                source_id: row.get(0)?,
                target_id: row.get(1)?,
                link_type: link_type
                    .parse()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                weight: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Sum of incident link weights per memory id, for composite scoring.
pub fn incident_weight_sums(
    conn: &Connection,
    memory_ids: &[&str],
) -> MemoryResult<std::collections::HashMap<String, f64>> {
    let mut sums: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
    if memory_ids.is_empty() {
        return Ok(sums);
    }

    let placeholders: Vec<String> = (1..=memory_ids.len()).map(|i| format!("?{i}")).collect();
    let clause = placeholders.join(", ");
    let sql = format!(
        "SELECT source_id, target_id, weight FROM memory_links \
         WHERE source_id IN ({clause}) OR target_id IN ({clause})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::types::ToSql> = memory_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows: Vec<(String, String, f64)> = stmt
        .query_map(params_vec.as_slice(), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (source, target, weight) in rows {
        if memory_ids.contains(&source.as_str()) {
            *sums.entry(source).or_insert(0.0) += weight;
        }
        if memory_ids.contains(&target.as_str()) {
            *sums.entry(target).or_insert(0.0) += weight;
        }
    }
    Ok(sums)
}

/// Score the four link heuristics for one candidate.
fn score_candidate(memory: &LinkSeed, candidate: &LinkCandidate) -> Vec<(LinkType, f64)> {
    let mut scored = Vec::new();

    if candidate.semantic_similarity >= SEMANTIC_THRESHOLD {
        scored.push((LinkType::Semantic, candidate.semantic_similarity));
    }

    let temporal = temporal_score(&memory.created_at, &candidate.created_at);
    if temporal >= TEMPORAL_THRESHOLD {
        scored.push((LinkType::Temporal, temporal));
    }

    let causal = causal_score(memory, candidate);
    if causal >= CAUSAL_THRESHOLD {
        scored.push((LinkType::Causal, causal));
    }

    let analogical = jaccard(&memory.tags, &candidate.tags);
    if analogical >= ANALOGICAL_THRESHOLD {
        scored.push((LinkType::Analogical, analogical));
    }

    scored
}

/// Inverse of the creation-time gap: `1 / (1 + |Δ| in days)`.
fn temporal_score(a: &str, b: &str) -> f64 {
    let (Ok(ta), Ok(tb)) = (
        chrono::DateTime::parse_from_rfc3339(a),
        chrono::DateTime::parse_from_rfc3339(b),
    ) else {
        return 0.0;
    };
    let delta_days = (ta - tb).num_milliseconds().abs() as f64 / 86_400_000.0;
    1.0 / (1.0 + delta_days)
}

/// Keyword overlap gated on a causal cue appearing in either content.
fn causal_score(memory: &LinkSeed, candidate: &LinkCandidate) -> f64 {
    let has_cue = |content: &str| {
        let lower = content.to_lowercase();
        CAUSAL_CUES.iter().any(|cue| lower.contains(cue))
    };
    if !has_cue(&memory.content) && !has_cue(&candidate.content) {
        return 0.0;
    }
    let overlap = jaccard(&memory.keywords, &candidate.keywords);
    if overlap == 0.0 {
        return 0.0;
    }
    0.5 + 0.5 * overlap
}

/// Case-insensitive Jaccard overlap of two string sets.
fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<String> =
        a.iter().map(|s| s.to_lowercase()).collect();
    let set_b: std::collections::HashSet<String> =
        b.iter().map(|s| s.to_lowercase()).collect();
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}
