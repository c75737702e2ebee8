//! Configuration loading and management.
//!
//! Engram reads configuration from `~/.engram/config.toml` (if present) with
//! environment variable overrides (`ENGRAM_DB`, `ENGRAM_NAMESPACE`,
//! `ENGRAM_LOG_LEVEL`). All fields have sensible defaults — no configuration
//! file is required.
//!
//! Decay and consolidation parameters are validated on load and on every
//! runtime patch. Runtime updates go through [`ConfigHandle`], which swaps an
//! `Arc` snapshot so concurrent readers never observe a half-updated config.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::memory::types::Sector;

/// Top-level Engram configuration, deserialized from `config.toml`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngramConfig {
    /// HTTP server bind address and logging settings.
    pub server: ServerConfig,
    /// Database path and default embedding namespace.
    pub storage: StorageConfig,
    /// Embedding model and cache directory.
    pub embedding: EmbeddingConfig,
    /// Temporal decay, reinforcement, and pruning parameters.
    pub decay: DecayConfig,
    /// Consolidation clustering thresholds and scheduler gating.
    pub consolidation: ConsolidationConfig,
    /// Search candidate fan-out and composite-score shaping.
    pub search: SearchConfig,
}

/// HTTP server and logging settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Tracing log level (e.g. `"info"`, `"debug"`, `"trace"`).
    pub log_level: String,
    /// Bind address (default `"127.0.0.1"`).
    pub host: String,
    /// Port (default `8080`).
    pub port: u16,
    /// Cron expression for the scheduled decay maintenance job.
    pub decay_schedule: String,
}

/// Database path and default embedding namespace.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file (supports `~` expansion).
    pub db_path: String,
    /// Namespace embeddings are written under (default `"default"`).
    pub namespace: String,
}

/// Embedding model configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type: `"local"` for ONNX Runtime (only option currently).
    pub provider: String,
    /// Model identifier (default `"all-MiniLM-L6-v2"`).
    pub model: String,
    /// Directory to cache model files (supports `~` expansion).
    pub cache_dir: String,
}

/// Per-sector decay multipliers applied on top of the base decay rate.
///
/// Larger multiplier ⇒ faster forgetting. The defaults preserve the retention
/// order semantic > procedural > reflective > emotional > episodic.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SectorMultipliers {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
    pub emotional: f64,
    pub reflective: f64,
}

impl SectorMultipliers {
    /// Multiplier for a given sector.
    pub fn get(&self, sector: Sector) -> f64 {
        match sector {
            Sector::Episodic => self.episodic,
            Sector::Semantic => self.semantic,
            Sector::Procedural => self.procedural,
            Sector::Emotional => self.emotional,
            Sector::Reflective => self.reflective,
        }
    }
}

impl Default for SectorMultipliers {
    fn default() -> Self {
        Self {
            episodic: 3.0,
            semantic: 0.5,
            procedural: 0.8,
            emotional: 2.0,
            reflective: 1.5,
        }
    }
}

/// Temporal decay, reinforcement, and pruning parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    /// Base decay rate λ per day; effective rate is `base_lambda × multiplier`.
    pub base_lambda: f64,
    /// Per-sector multipliers on the base rate.
    pub sector_multipliers: SectorMultipliers,
    /// Decay never reduces strength below this floor.
    pub minimum_strength: f64,
    /// Memories below this strength become pruning candidates.
    pub pruning_threshold: f64,
    /// Default strength boost applied on reinforcement.
    pub reinforcement_boost: f64,
    /// Rows processed per maintenance batch.
    pub maintenance_batch_size: usize,
}

impl DecayConfig {
    /// Effective decay rate λ for a sector: `base_lambda × multiplier`.
    pub fn effective_decay_rate(&self, sector: Sector) -> f64 {
        self.base_lambda * self.sector_multipliers.get(sector)
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_lambda: 0.01,
            sector_multipliers: SectorMultipliers::default(),
            minimum_strength: 0.05,
            pruning_threshold: 0.1,
            reinforcement_boost: 0.1,
            maintenance_batch_size: 1000,
        }
    }
}

/// Consolidation clustering thresholds and scheduler gating.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Minimum pairwise cosine similarity for cluster membership.
    pub similarity_threshold: f64,
    /// Minimum members before a cluster is consolidated.
    pub min_cluster_size: usize,
    /// Clusters processed per transaction.
    pub batch_size: usize,
    /// Each source's strength is multiplied by this factor.
    pub strength_reduction_factor: f64,
    /// Whether soft-deleted memories (strength 0) remain eligible sources.
    pub include_soft_deleted: bool,
    /// `trigger_now` fails with `LoadThresholdExceeded` above this many
    /// concurrent core operations.
    pub max_concurrent_load: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            min_cluster_size: 3,
            batch_size: 10,
            strength_reduction_factor: 0.8,
            include_soft_deleted: false,
            max_concurrent_load: 8,
        }
    }
}

/// Search fan-out and composite-score shaping.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// KNN candidates fetched per sector = `limit × candidate_multiplier`.
    pub candidate_multiplier: usize,
    /// Similarity results below this are dropped before scoring.
    pub min_similarity: f64,
    /// γ in `recency = exp(−γ · age_days)`.
    pub recency_gamma: f64,
    /// Incident link weights are summed then divided by this normaliser.
    pub link_weight_normaliser: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 4,
            min_similarity: 0.25,
            recency_gamma: 0.05,
            link_weight_normaliser: 10.0,
        }
    }
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            decay: DecayConfig::default(),
            consolidation: ConsolidationConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            decay_schedule: "0 3 * * *".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_engram_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            namespace: "default".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_engram_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists), apply env var overrides,
    /// then validate.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DB, ENGRAM_NAMESPACE, ENGRAM_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key));
    }

    /// Apply overrides using a custom env lookup function.
    fn apply_env_overrides_with(
        &mut self,
        env: impl Fn(&str) -> Result<String, std::env::VarError>,
    ) {
        if let Ok(val) = env("ENGRAM_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = env("ENGRAM_NAMESPACE") {
            self.storage.namespace = val;
        }
        if let Ok(val) = env("ENGRAM_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Check every numeric parameter against its documented range.
    pub fn validate(&self) -> Result<()> {
        let d = &self.decay;
        ensure!(d.base_lambda > 0.0, "decay.base_lambda must be > 0");
        for sector in Sector::ALL {
            ensure!(
                d.sector_multipliers.get(sector) > 0.0,
                "decay.sector_multipliers.{sector} must be > 0"
            );
        }
        ensure!(
            d.minimum_strength > 0.0 && d.minimum_strength < 1.0,
            "decay.minimum_strength must be in (0, 1)"
        );
        ensure!(
            d.pruning_threshold > 0.0 && d.pruning_threshold < 1.0,
            "decay.pruning_threshold must be in (0, 1)"
        );
        ensure!(
            d.reinforcement_boost > 0.0 && d.reinforcement_boost <= 1.0,
            "decay.reinforcement_boost must be in (0, 1]"
        );
        ensure!(
            d.maintenance_batch_size >= 1,
            "decay.maintenance_batch_size must be >= 1"
        );

        let c = &self.consolidation;
        ensure!(
            (0.0..=1.0).contains(&c.similarity_threshold),
            "consolidation.similarity_threshold must be in [0, 1]"
        );
        ensure!(
            c.min_cluster_size >= 2,
            "consolidation.min_cluster_size must be >= 2"
        );
        ensure!(c.batch_size >= 1, "consolidation.batch_size must be >= 1");
        ensure!(
            (0.0..=1.0).contains(&c.strength_reduction_factor),
            "consolidation.strength_reduction_factor must be in [0, 1]"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

/// Runtime-updatable fields of the decay and consolidation sections.
///
/// `None` leaves the current value untouched.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigPatch {
    pub base_lambda: Option<f64>,
    pub minimum_strength: Option<f64>,
    pub pruning_threshold: Option<f64>,
    pub reinforcement_boost: Option<f64>,
    pub similarity_threshold: Option<f64>,
    pub min_cluster_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub strength_reduction_factor: Option<f64>,
}

/// Process-wide config handle: copy-on-write snapshots behind a lock.
///
/// Readers call [`ConfigHandle::snapshot`] and keep the `Arc` for the duration
/// of an operation; [`ConfigHandle::update`] validates the patched config
/// before publishing it, so a bad patch never becomes visible.
pub struct ConfigHandle {
    inner: RwLock<Arc<EngramConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngramConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Current config snapshot.
    pub fn snapshot(&self) -> Arc<EngramConfig> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Apply a patch atomically. Subsequent `snapshot` calls observe the new
    /// values; concurrent readers keep their old snapshot.
    pub fn update(&self, patch: &ConfigPatch) -> Result<Arc<EngramConfig>> {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let mut next = (**guard).clone();

        if let Some(v) = patch.base_lambda {
            next.decay.base_lambda = v;
        }
        if let Some(v) = patch.minimum_strength {
            next.decay.minimum_strength = v;
        }
        if let Some(v) = patch.pruning_threshold {
            next.decay.pruning_threshold = v;
        }
        if let Some(v) = patch.reinforcement_boost {
            next.decay.reinforcement_boost = v;
        }
        if let Some(v) = patch.similarity_threshold {
            next.consolidation.similarity_threshold = v;
        }
        if let Some(v) = patch.min_cluster_size {
            next.consolidation.min_cluster_size = v;
        }
        if let Some(v) = patch.batch_size {
            next.consolidation.batch_size = v;
        }
        if let Some(v) = patch.strength_reduction_factor {
            next.consolidation.strength_reduction_factor = v;
        }

        next.validate()?;
        let arc = Arc::new(next);
        *guard = arc.clone();
        Ok(arc)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngramConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.storage.namespace, "default");
        assert!(config.storage.db_path.ends_with("memory.db"));
    }

    #[test]
    fn default_multipliers_preserve_retention_order() {
        // Retention at 30 days from strength 1.0 must satisfy
        // semantic > procedural > reflective > emotional > episodic.
        let decay = DecayConfig::default();
        let retained: Vec<f64> = [
            Sector::Semantic,
            Sector::Procedural,
            Sector::Reflective,
            Sector::Emotional,
            Sector::Episodic,
        ]
        .iter()
        .map(|&s| (-decay.effective_decay_rate(s) * 30.0).exp())
        .collect();

        for pair in retained.windows(2) {
            assert!(pair[0] > pair[1], "retention order violated: {retained:?}");
        }
    }

    #[test]
    fn effective_rate_is_base_times_multiplier() {
        let decay = DecayConfig::default();
        assert!((decay.effective_decay_rate(Sector::Episodic) - 0.03).abs() < 1e-12);
        assert!((decay.effective_decay_rate(Sector::Semantic) - 0.005).abs() < 1e-12);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"
namespace = "workbench"

[decay]
base_lambda = 0.02

[consolidation]
min_cluster_size = 4
"#;
        let config: EngramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.namespace, "workbench");
        assert!((config.decay.base_lambda - 0.02).abs() < 1e-12);
        assert_eq!(config.consolidation.min_cluster_size, 4);
        // defaults still apply for unset fields
        assert_eq!(config.decay.maintenance_batch_size, 1000);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngramConfig::default();
        let env = |key: &str| match key {
            "ENGRAM_DB" => Ok("/tmp/override.db".into()),
            "ENGRAM_NAMESPACE" => Ok("env-space".into()),
            "ENGRAM_LOG_LEVEL" => Ok("trace".into()),
            _ => Err(std::env::VarError::NotPresent),
        };

        config.apply_env_overrides_with(env);

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.storage.namespace, "env-space");
        assert_eq!(config.server.log_level, "trace");
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let mut config = EngramConfig::default();
        config.decay.base_lambda = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.decay.minimum_strength = 1.0;
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.consolidation.min_cluster_size = 1;
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.consolidation.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_handle_swaps_snapshots() {
        let handle = ConfigHandle::new(EngramConfig::default());
        let before = handle.snapshot();

        let patch = ConfigPatch {
            similarity_threshold: Some(0.9),
            strength_reduction_factor: Some(0.5),
            ..ConfigPatch::default()
        };
        handle.update(&patch).unwrap();

        let after = handle.snapshot();
        assert!((after.consolidation.similarity_threshold - 0.9).abs() < 1e-12);
        assert!((after.consolidation.strength_reduction_factor - 0.5).abs() < 1e-12);
        // The old snapshot is untouched.
        assert!((before.consolidation.similarity_threshold - 0.85).abs() < 1e-12);
    }

    #[test]
    fn config_handle_rejects_invalid_patch() {
        let handle = ConfigHandle::new(EngramConfig::default());
        let patch = ConfigPatch {
            base_lambda: Some(-1.0),
            ..ConfigPatch::default()
        };
        assert!(handle.update(&patch).is_err());
        // Current config unchanged.
        assert!((handle.snapshot().decay.base_lambda - 0.01).abs() < 1e-12);
    }
}
