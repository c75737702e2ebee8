//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait and a local implementation using
//! all-MiniLM-L6-v2 (384 dimensions, L2-normalized). Each memory carries five
//! vectors, one per [`Sector`]; a provider produces the sector variants by
//! prefixing the text with a fixed per-sector cue phrase, so the five vectors
//! are distinct but fully deterministic.

pub mod local;

use anyhow::Result;

use crate::memory::types::Sector;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// The five per-sector vectors of a single memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorEmbeddings {
    pub episodic: Vec<f32>,
    pub semantic: Vec<f32>,
    pub procedural: Vec<f32>,
    pub emotional: Vec<f32>,
    pub reflective: Vec<f32>,
}

impl SectorEmbeddings {
    /// The vector for a given sector.
    pub fn get(&self, sector: Sector) -> &[f32] {
        match sector {
            Sector::Episodic => &self.episodic,
            Sector::Semantic => &self.semantic,
            Sector::Procedural => &self.procedural,
            Sector::Emotional => &self.emotional,
            Sector::Reflective => &self.reflective,
        }
    }

    /// Iterate `(sector, vector)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Sector, &[f32])> + '_ {
        Sector::ALL.into_iter().map(move |s| (s, self.get(s)))
    }

    /// True if every sector vector has the expected length.
    pub fn dimensions_match(&self, dimensions: usize) -> bool {
        self.iter().all(|(_, v)| v.len() == dimensions)
    }
}

/// Cue phrase prepended to the text before embedding for a given sector.
pub fn sector_cue(sector: Sector) -> &'static str {
    match sector {
        Sector::Episodic => "event record:",
        Sector::Semantic => "factual knowledge:",
        Sector::Procedural => "procedure description:",
        Sector::Emotional => "emotional context:",
        Sector::Reflective => "reflective insight:",
    }
}

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly
/// [`EmbeddingProvider::dimensions`] entries. All methods are synchronous —
/// callers in async contexts should use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector (no sector conditioning).
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed text conditioned on a sector.
    fn embed_sector(&self, text: &str, sector: Sector) -> Result<Vec<f32>> {
        self.embed(&format!("{} {}", sector_cue(sector), text))
    }

    /// Embed all five sector variants of a text in one batched call, so
    /// providers with batched inference pay a single forward pass.
    fn embed_all_sectors(&self, text: &str) -> Result<SectorEmbeddings> {
        let prompts: Vec<String> = Sector::ALL
            .iter()
            .map(|&sector| format!("{} {}", sector_cue(sector), text))
            .collect();
        let prompt_refs: Vec<&str> = prompts.iter().map(String::as_str).collect();

        let vectors = self.embed_batch(&prompt_refs)?;
        anyhow::ensure!(
            vectors.len() == Sector::ALL.len(),
            "expected {} sector vectors, got {}",
            Sector::ALL.len(),
            vectors.len()
        );

        let mut it = vectors.into_iter();
        Ok(SectorEmbeddings {
            episodic: it.next().expect("length checked"),
            semantic: it.next().expect("length checked"),
            procedural: it.next().expect("length checked"),
            emotional: it.next().expect("length checked"),
            reflective: it.next().expect("length checked"),
        })
    }

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + all-MiniLM-L6-v2).
/// Returns an error if model files are not found — run `engram model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic provider: a unit spike at a position derived from the text.
    struct SpikeProvider;

    impl EmbeddingProvider for SpikeProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; EMBEDDING_DIM];
            let idx = text.bytes().map(|b| b as usize).sum::<usize>() % EMBEDDING_DIM;
            v[idx] = 1.0;
            Ok(v)
        }
    }

    #[test]
    fn sector_variants_differ() {
        let provider = SpikeProvider;
        let embs = provider.embed_all_sectors("the build failed on tuesday").unwrap();
        assert!(embs.dimensions_match(EMBEDDING_DIM));
        // Cue phrases shift the spike position, so at least two sectors differ.
        assert_ne!(embs.episodic, embs.semantic);
    }

    #[test]
    fn sector_embedding_is_deterministic() {
        let provider = SpikeProvider;
        let a = provider.embed_sector("same text", Sector::Emotional).unwrap();
        let b = provider.embed_sector("same text", Sector::Emotional).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn batched_sectors_match_single_calls() {
        let provider = SpikeProvider;
        let batched = provider.embed_all_sectors("one text, five views").unwrap();
        for sector in Sector::ALL {
            let single = provider
                .embed_sector("one text, five views", sector)
                .unwrap();
            assert_eq!(batched.get(sector), single.as_slice(), "{sector}");
        }
    }

    #[test]
    fn dimensions_match_flags_short_vectors() {
        let embs = SectorEmbeddings {
            episodic: vec![0.0; EMBEDDING_DIM],
            semantic: vec![0.0; EMBEDDING_DIM - 1],
            procedural: vec![0.0; EMBEDDING_DIM],
            emotional: vec![0.0; EMBEDDING_DIM],
            reflective: vec![0.0; EMBEDDING_DIM],
        };
        assert!(!embs.dimensions_match(EMBEDDING_DIM));
    }
}
