//! Engram — a cognitive memory store.
//!
//! Engram persists content records embedded into vector space across five
//! semantic sectors, links them into a typed waypoint graph, decays their
//! strength over time with sector-specific rates, reinforces them on access,
//! consolidates near-duplicate episodic clusters into semantic summaries,
//! and serves similarity + metadata + graph queries.
//!
//! | Sector | Retention |
//! |--------|-----------|
//! | **Semantic** | Slowest decay (facts, knowledge) |
//! | **Procedural** | Slow (workflows, how-to) |
//! | **Reflective** | Medium (insights) |
//! | **Emotional** | Fast (affective context) |
//! | **Episodic** | Fastest decay (events); consolidation source |
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for per-sector vector KNN
//! - **Embeddings**: Local ONNX Runtime with all-MiniLM-L6-v2 (384 dims),
//!   sector-conditioned via cue phrases
//! - **Scoring**: `0.6·similarity + 0.2·salience + 0.1·recency + 0.1·link_weight`
//! - **Transport**: REST over axum
//!
//! # Modules
//!
//! - [`config`] — TOML configuration with env overrides and hot-reload snapshots
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`embedding`] — text-to-vector pipeline and the provider trait
//! - [`error`] — the memory core's error taxonomy
//! - [`memory`] — repository, links, decay, consolidation, search, export
//! - [`validation`] — schema registry and field-error shaping

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod validation;
