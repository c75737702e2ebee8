//! Per-sector embedding store backed by sqlite-vec.
//!
//! Each memory carries five vectors, one per sector, stored in per-sector
//! vec0 virtual tables under a namespace (default `"default"`). All five are
//! written atomically with the record by running inside the repository's
//! transaction. Vectors are defensively L2-normalized on write, and
//! similarities are recomputed exactly in Rust for returned hits so a
//! zero-magnitude vector yields similarity 0, never NaN.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::schema::vec_table_name;
use crate::embedding::SectorEmbeddings;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::types::Sector;
use crate::memory::{bytes_to_embedding, cosine_similarity, embedding_to_bytes};

/// A single similarity hit from [`vector_similarity_search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    pub memory_id: String,
    pub similarity: f64,
}

/// Row key inside the vec0 tables: `"{namespace}/{memory_id}"`.
fn vec_key(namespace: &str, memory_id: &str) -> String {
    format!("{namespace}/{memory_id}")
}

/// Strip the namespace prefix from a vec0 row key, if it matches.
fn strip_namespace<'a>(key: &'a str, namespace: &str) -> Option<&'a str> {
    key.strip_prefix(namespace).and_then(|r| r.strip_prefix('/'))
}

/// Atomically upsert all five sector vectors for a memory.
///
/// Runs inside the caller's transaction; fails with `StorageFailed` when any
/// vector's length differs from the configured dimension.
pub fn store(
    conn: &Connection,
    memory_id: &str,
    embeddings: &SectorEmbeddings,
    namespace: &str,
    dimensions: usize,
) -> MemoryResult<()> {
    if !embeddings.dimensions_match(dimensions) {
        return Err(MemoryError::StorageFailed(format!(
            "embedding dimension mismatch: expected {dimensions}"
        )));
    }

    let key = vec_key(namespace, memory_id);
    for (sector, vector) in embeddings.iter() {
        let normalized = normalize(vector);
        let table = vec_table_name(sector);
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![key])?;
        conn.execute(
            &format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"),
            params![key, embedding_to_bytes(&normalized)],
        )?;
    }
    Ok(())
}

/// Fetch all five sector vectors for a memory, or `None` if absent.
pub fn retrieve(
    conn: &Connection,
    memory_id: &str,
    namespace: &str,
) -> MemoryResult<Option<SectorEmbeddings>> {
    let key = vec_key(namespace, memory_id);
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(5);

    for sector in Sector::ALL {
        let table = vec_table_name(sector);
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                &format!("SELECT embedding FROM {table} WHERE id = ?1"),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match bytes {
            Some(b) => vectors.push(bytes_to_embedding(&b)),
            None => return Ok(None),
        }
    }

    let mut it = vectors.into_iter();
    Ok(Some(SectorEmbeddings {
        episodic: it.next().unwrap(),
        semantic: it.next().unwrap(),
        procedural: it.next().unwrap(),
        emotional: it.next().unwrap(),
        reflective: it.next().unwrap(),
    }))
}

/// Remove all five sector vectors for a memory. Cascaded by the repository.
pub fn delete(conn: &Connection, memory_id: &str, namespace: &str) -> MemoryResult<()> {
    let key = vec_key(namespace, memory_id);
    for sector in Sector::ALL {
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", vec_table_name(sector)),
            params![key],
        )?;
    }
    Ok(())
}

/// Top-K cosine similarity search within one sector.
///
/// Results are ordered by descending similarity with deterministic tie-break
/// by memory id ascending; hits below `min_similarity` are excluded. A
/// zero-magnitude query matches nothing.
pub fn vector_similarity_search(
    conn: &Connection,
    query: &[f32],
    sector: Sector,
    k: usize,
    min_similarity: f64,
    namespace: &str,
) -> MemoryResult<Vec<SimilarityHit>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let query = normalize(query);
    if query.iter().all(|&x| x == 0.0) {
        tracing::debug!(sector = %sector, "zero-magnitude query vector, no matches");
        return Ok(Vec::new());
    }

    let table = vec_table_name(sector);
    // Over-fetch to survive rows from other namespaces in the same table.
    let fetch = (k * 2).max(k + 8);

    let mut stmt = conn.prepare(&format!(
        "SELECT id, embedding FROM {table} WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2"
    ))?;
    let rows: Vec<(String, Vec<u8>)> = stmt
        .query_map(params![embedding_to_bytes(&query), fetch as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut hits: Vec<SimilarityHit> = rows
        .into_iter()
        .filter_map(|(key, bytes)| {
            let memory_id = strip_namespace(&key, namespace)?.to_string();
            // Exact cosine, recomputed in Rust: robust against unnormalized or
            // zero vectors that slipped into storage.
            let similarity = cosine_similarity(&query, &bytes_to_embedding(&bytes));
            Some(SimilarityHit {
                memory_id,
                similarity,
            })
        })
        .filter(|hit| hit.similarity >= min_similarity)
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    hits.truncate(k);
    Ok(hits)
}

/// L2-normalize; zero vectors pass through unchanged.
fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && (norm - 1.0).abs() > f32::EPSILON {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::EMBEDDING_DIM;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn spike(idx: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[idx % EMBEDDING_DIM] = 1.0;
        v
    }

    fn five(idx: usize) -> SectorEmbeddings {
        SectorEmbeddings {
            episodic: spike(idx),
            semantic: spike(idx + 1),
            procedural: spike(idx + 2),
            emotional: spike(idx + 3),
            reflective: spike(idx + 4),
        }
    }

    #[test]
    fn store_and_retrieve_round_trip() {
        let conn = test_db();
        let embs = five(10);
        store(&conn, "m1", &embs, "default", EMBEDDING_DIM).unwrap();

        let fetched = retrieve(&conn, "m1", "default").unwrap().unwrap();
        assert_eq!(fetched, embs);

        assert!(retrieve(&conn, "missing", "default").unwrap().is_none());
        assert!(retrieve(&conn, "m1", "other-space").unwrap().is_none());
    }

    #[test]
    fn store_rejects_wrong_dimension() {
        let conn = test_db();
        let mut embs = five(10);
        embs.semantic = vec![1.0; EMBEDDING_DIM - 1];
        let err = store(&conn, "m1", &embs, "default", EMBEDDING_DIM).unwrap_err();
        assert!(matches!(err, MemoryError::StorageFailed(_)));
    }

    #[test]
    fn store_is_an_upsert() {
        let conn = test_db();
        store(&conn, "m1", &five(10), "default", EMBEDDING_DIM).unwrap();
        store(&conn, "m1", &five(20), "default", EMBEDDING_DIM).unwrap();

        let fetched = retrieve(&conn, "m1", "default").unwrap().unwrap();
        assert_eq!(fetched.episodic, spike(20));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vec_episodic", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn search_orders_by_similarity() {
        let conn = test_db();
        store(&conn, "near", &five(10), "default", EMBEDDING_DIM).unwrap();
        store(&conn, "far", &five(100), "default", EMBEDDING_DIM).unwrap();

        let hits =
            vector_similarity_search(&conn, &spike(10), Sector::Episodic, 5, 0.0, "default")
                .unwrap();
        assert_eq!(hits[0].memory_id, "near");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_excludes_below_min_similarity() {
        let conn = test_db();
        store(&conn, "near", &five(10), "default", EMBEDDING_DIM).unwrap();
        store(&conn, "orthogonal", &five(100), "default", EMBEDDING_DIM).unwrap();

        let hits =
            vector_similarity_search(&conn, &spike(10), Sector::Episodic, 5, 0.5, "default")
                .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, "near");
    }

    #[test]
    fn search_ties_break_by_id_ascending() {
        let conn = test_db();
        // Two memories with identical episodic vectors.
        store(&conn, "bbb", &five(10), "default", EMBEDDING_DIM).unwrap();
        store(&conn, "aaa", &five(10), "default", EMBEDDING_DIM).unwrap();

        let hits =
            vector_similarity_search(&conn, &spike(10), Sector::Episodic, 5, 0.0, "default")
                .unwrap();
        assert_eq!(hits[0].memory_id, "aaa");
        assert_eq!(hits[1].memory_id, "bbb");
    }

    #[test]
    fn search_respects_namespace() {
        let conn = test_db();
        store(&conn, "mine", &five(10), "default", EMBEDDING_DIM).unwrap();
        store(&conn, "theirs", &five(10), "archive", EMBEDDING_DIM).unwrap();

        let hits =
            vector_similarity_search(&conn, &spike(10), Sector::Episodic, 5, 0.0, "default")
                .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.memory_id.as_str()).collect();
        assert_eq!(ids, vec!["mine"]);
    }

    #[test]
    fn zero_query_matches_nothing() {
        let conn = test_db();
        store(&conn, "m1", &five(10), "default", EMBEDDING_DIM).unwrap();

        let zero = vec![0.0f32; EMBEDDING_DIM];
        let hits =
            vector_similarity_search(&conn, &zero, Sector::Episodic, 5, 0.0, "default").unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn stored_zero_vector_scores_zero() {
        let conn = test_db();
        let mut embs = five(10);
        embs.episodic = vec![0.0; EMBEDDING_DIM];
        store(&conn, "hollow", &embs, "default", EMBEDDING_DIM).unwrap();

        let hits =
            vector_similarity_search(&conn, &spike(10), Sector::Episodic, 5, 0.0, "default")
                .unwrap();
        let hollow = hits.iter().find(|h| h.memory_id == "hollow").unwrap();
        assert_eq!(hollow.similarity, 0.0);
    }

    #[test]
    fn delete_removes_all_sectors() {
        let conn = test_db();
        store(&conn, "m1", &five(10), "default", EMBEDDING_DIM).unwrap();
        delete(&conn, "m1", "default").unwrap();
        assert!(retrieve(&conn, "m1", "default").unwrap().is_none());
    }

    #[test]
    fn unnormalized_vectors_are_normalized_on_write() {
        let conn = test_db();
        let mut embs = five(10);
        embs.episodic = {
            let mut v = vec![0.0f32; EMBEDDING_DIM];
            v[10] = 3.0; // norm 3, not 1
            v
        };
        store(&conn, "m1", &embs, "default", EMBEDDING_DIM).unwrap();

        let fetched = retrieve(&conn, "m1", "default").unwrap().unwrap();
        let norm: f32 = fetched.episodic.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
