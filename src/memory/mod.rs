//! Core memory engine — repository, embeddings, waypoint graph, decay,
//! consolidation, search, and export.
//!
//! This module contains the transactional repository ([`store`]), the
//! per-sector embedding store ([`embeddings`]), the waypoint graph builder
//! ([`links`]), the decay and reinforcement engine ([`decay`]), scheduled
//! maintenance ([`maintenance`]), the consolidation engine and its scheduler
//! ([`consolidate`], [`scheduler`]), the search engine ([`search`]),
//! export/import ([`export`]), and statistics ([`stats`]). Type definitions
//! live in [`types`].

pub mod consolidate;
pub mod decay;
pub mod embeddings;
pub mod export;
pub mod links;
pub mod maintenance;
pub mod scheduler;
pub mod search;
pub mod stats;
pub mod store;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert raw bytes back to an f32 embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Convert a cosine similarity threshold to an L2 distance threshold.
///
/// sqlite-vec defaults to L2 distance. For L2-normalized vectors:
///   L2_dist = sqrt(2 * (1 - cosine_similarity))
pub fn cosine_threshold_to_l2(cosine_threshold: f64) -> f64 {
    (2.0 * (1.0 - cosine_threshold)).sqrt()
}

/// Recover cosine similarity from an L2 distance between normalized vectors:
///   cos = 1 - d² / 2
/// The result is clamped to [-1, 1] against floating-point drift.
pub fn l2_distance_to_cosine(distance: f64) -> f64 {
    (1.0 - distance * distance / 2.0).clamp(-1.0, 1.0)
}

/// Cosine similarity with defensive normalization.
///
/// Zero-magnitude inputs yield similarity 0, never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Cooperative cancellation flag polled at batch boundaries by maintenance
/// and consolidation runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
