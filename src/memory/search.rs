//! Search engine — multi-sector vector similarity, metadata filters, and
//! composite scoring.
//!
//! The composite score is `0.6·similarity + 0.2·salience + 0.1·recency +
//! 0.1·link_weight`, each component clamped to [0, 1] before weighting.
//! Queries without text run in metadata-only mode with similarity 0; the
//! composite still ranks by salience, recency, and graph connectivity.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::types::{Memory, MemoryMetadata, Sector};
use crate::memory::{embeddings, links, store};

/// A search request. `sectors` empty means all five, merged. Deserializes
/// from the camelCase wire shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchQuery {
    pub user_id: String,
    pub text: Option<String>,
    pub sectors: Vec<Sector>,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub min_strength: f64,
    pub min_salience: f64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            text: None,
            sectors: Vec::new(),
            keywords: Vec::new(),
            tags: Vec::new(),
            category: None,
            created_after: None,
            created_before: None,
            limit: 10,
            offset: 0,
            min_strength: 0.0,
            min_salience: 0.0,
        }
    }
}

/// A scored result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub primary_sector: Sector,
    pub strength: f64,
    pub salience: f64,
    pub similarity: f64,
    pub score: f64,
    pub created_at: String,
    pub last_accessed: String,
    pub metadata: MemoryMetadata,
}

/// Response from [`search`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_matched: usize,
}

/// The composite score, bounded to [0, 1]. Every component is individually
/// clamped before weighting.
pub fn compose_score(similarity: f64, salience: f64, recency: f64, link_weight: f64) -> f64 {
    let clamp = |v: f64| v.clamp(0.0, 1.0);
    let score = 0.6 * clamp(similarity)
        + 0.2 * clamp(salience)
        + 0.1 * clamp(recency)
        + 0.1 * clamp(link_weight);
    score.clamp(0.0, 1.0)
}

/// Execute a search: per-sector KNN (or metadata-only), record filters,
/// composite scoring, deterministic ordering, pagination.
pub fn search(
    conn: &Connection,
    provider: &dyn EmbeddingProvider,
    query: &SearchQuery,
    cfg: &SearchConfig,
    namespace: &str,
) -> MemoryResult<SearchResponse> {
    validate_query(query)?;

    // 1. Candidate ids with their best similarity across requested sectors.
    let similarities = match &query.text {
        Some(text) => knn_candidates(conn, provider, text, query, cfg, namespace)?,
        None => metadata_candidates(conn, query)?,
    };
    if similarities.is_empty() {
        return Ok(SearchResponse {
            results: Vec::new(),
            total_matched: 0,
        });
    }

    // 2. Fetch and filter the records.
    let ids: Vec<&str> = similarities.keys().map(|s| s.as_str()).collect();
    let records = store::fetch_memories(conn, &ids)?;
    let filtered: Vec<&Memory> = records
        .values()
        .filter(|m| record_matches(m, query))
        .collect();

    // 3. Incident link weights for the survivors.
    let surviving_ids: Vec<&str> = filtered.iter().map(|m| m.id.as_str()).collect();
    let link_sums = links::incident_weight_sums(conn, &surviving_ids)?;

    // 4. Score.
    let now = chrono::Utc::now();
    let mut hits: Vec<SearchHit> = filtered
        .into_iter()
        .map(|memory| {
            let similarity = similarities.get(&memory.id).copied().unwrap_or(0.0);
            let recency = recency_component(&memory.last_accessed, now, cfg.recency_gamma);
            let link_weight = (link_sums.get(&memory.id).copied().unwrap_or(0.0)
                / cfg.link_weight_normaliser)
                .min(1.0);
            let score = compose_score(similarity, memory.salience, recency, link_weight);
            SearchHit {
                id: memory.id.clone(),
                content: memory.content.clone(),
                primary_sector: memory.primary_sector,
                strength: memory.strength,
                salience: memory.salience,
                similarity,
                score,
                created_at: memory.created_at.clone(),
                last_accessed: memory.last_accessed.clone(),
                metadata: memory.metadata.clone(),
            }
        })
        .collect();

    // 5. Deterministic ordering: score desc, last_accessed desc, id asc.
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_accessed.cmp(&a.last_accessed))
            .then_with(|| a.id.cmp(&b.id))
    });

    let total_matched = hits.len();
    let results: Vec<SearchHit> = hits
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();

    Ok(SearchResponse {
        results,
        total_matched,
    })
}

/// `exp(−γ · age_days)` from `last_accessed`, clamped into [0, 1].
fn recency_component(last_accessed: &str, now: chrono::DateTime<chrono::Utc>, gamma: f64) -> f64 {
    let Ok(t0) = chrono::DateTime::parse_from_rfc3339(last_accessed) else {
        return 0.0;
    };
    let age_days =
        ((now - t0.with_timezone(&chrono::Utc)).num_milliseconds().max(0)) as f64 / 86_400_000.0;
    (-gamma * age_days).exp().clamp(0.0, 1.0)
}

fn validate_query(query: &SearchQuery) -> MemoryResult<()> {
    let value = serde_json::json!({
        "userId": query.user_id,
        "limit": query.limit,
        "minStrength": query.min_strength,
        "minSalience": query.min_salience,
    });
    crate::validation::check("search.request", &value)
        .map_err(|field_errors| MemoryError::Validation { field_errors })
}

/// Per-sector KNN over the requested sectors; an id keeps its best similarity.
fn knn_candidates(
    conn: &Connection,
    provider: &dyn EmbeddingProvider,
    text: &str,
    query: &SearchQuery,
    cfg: &SearchConfig,
    namespace: &str,
) -> MemoryResult<HashMap<String, f64>> {
    let sectors: &[Sector] = if query.sectors.is_empty() {
        &Sector::ALL
    } else {
        &query.sectors
    };
    let k = query.limit.saturating_mul(cfg.candidate_multiplier).max(query.limit);

    let mut best: HashMap<String, f64> = HashMap::new();
    for &sector in sectors {
        let vector = provider
            .embed_sector(text, sector)
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;
        let hits = embeddings::vector_similarity_search(
            conn,
            &vector,
            sector,
            k,
            cfg.min_similarity,
            namespace,
        )?;
        for hit in hits {
            let entry = best.entry(hit.memory_id).or_insert(hit.similarity);
            if hit.similarity > *entry {
                *entry = hit.similarity;
            }
        }
    }
    Ok(best)
}

/// Metadata-only mode: every candidate carries similarity 0.
fn metadata_candidates(
    conn: &Connection,
    query: &SearchQuery,
) -> MemoryResult<HashMap<String, f64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM memories WHERE user_id = ?1 AND strength >= ?2 AND salience >= ?3",
    )?;
    let ids = stmt
        .query_map(
            params![query.user_id, query.min_strength, query.min_salience],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| (id, 0.0)).collect())
}

/// Post-fetch predicate: tenant scope, thresholds, and metadata filters.
fn record_matches(memory: &Memory, query: &SearchQuery) -> bool {
    if memory.user_id != query.user_id {
        return false;
    }
    if memory.strength < query.min_strength || memory.salience < query.min_salience {
        return false;
    }
    if !query.keywords.is_empty() && !overlaps(&memory.metadata.keywords, &query.keywords) {
        return false;
    }
    if !query.tags.is_empty() && !overlaps(&memory.metadata.tags, &query.tags) {
        return false;
    }
    if let Some(category) = &query.category {
        if memory.metadata.category.as_deref() != Some(category.as_str()) {
            return false;
        }
    }
    if let Some(after) = &query.created_after {
        if memory.created_at.as_str() < after.as_str() {
            return false;
        }
    }
    if let Some(before) = &query.created_before {
        if memory.created_at.as_str() > before.as_str() {
            return false;
        }
    }
    true
}

/// Case-insensitive array overlap (`&&` semantics).
fn overlaps(stored: &[String], wanted: &[String]) -> bool {
    stored.iter().any(|s| {
        let s = s.to_lowercase();
        wanted.iter().any(|w| w.to_lowercase() == s)
    })
}
