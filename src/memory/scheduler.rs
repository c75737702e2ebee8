//! Consolidation scheduler — a singleton status machine with one exclusive
//! run slot.
//!
//! `trigger_now` fails fast with `JobInProgress` while a run holds the slot
//! and with `LoadThresholdExceeded` when the load gauge is above the
//! configured ceiling. All status fields live behind a single mutex, so a
//! status snapshot is always internally consistent.

use rusqlite::Connection;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::{ConsolidationConfig, DecayConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::consolidate::{self, ConsolidationReport};
use crate::memory::CancelToken;

/// Phases a consolidation run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPhase {
    Idle,
    Scanning,
    Clustering,
    Summarising,
    Weakening,
    Done,
}

/// Live progress of the current (or last) run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationProgress {
    pub phase: ConsolidationPhase,
    pub clusters_identified: usize,
    pub clusters_consolidated: usize,
    pub memories_processed: usize,
    pub memories_total: usize,
    pub percent_complete: f64,
    pub estimated_remaining_ms: u64,
}

impl Default for ConsolidationProgress {
    fn default() -> Self {
        Self {
            phase: ConsolidationPhase::Idle,
            clusters_identified: 0,
            clusters_consolidated: 0,
            memories_processed: 0,
            memories_total: 0,
            percent_complete: 0.0,
            estimated_remaining_ms: 0,
        }
    }
}

/// A consistent snapshot of the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    /// Coarse completion percentage of the current (or last) run.
    pub current_progress: f64,
    pub last_error: Option<String>,
    pub retry_attempts: u32,
    pub batch_size: usize,
    pub detailed_progress: ConsolidationProgress,
}

/// Counts in-flight core operations; consolidation yields to foreground work.
#[derive(Debug, Clone, Default)]
pub struct LoadGauge(Arc<AtomicUsize>);

impl LoadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// RAII permit: increments now, decrements on drop.
    pub fn enter(&self) -> LoadPermit {
        self.0.fetch_add(1, Ordering::SeqCst);
        LoadPermit(self.0.clone())
    }

    pub fn current(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct LoadPermit(Arc<AtomicUsize>);

impl Drop for LoadPermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SchedulerInner {
    is_running: bool,
    last_run_at: Option<String>,
    next_run_at: Option<String>,
    last_error: Option<String>,
    retry_attempts: u32,
    progress: ConsolidationProgress,
}

/// The singleton scheduler. Shared across the server via `Arc`.
pub struct ConsolidationScheduler {
    state: Mutex<SchedulerInner>,
    load: LoadGauge,
    cancel: Mutex<CancelToken>,
}

impl Default for ConsolidationScheduler {
    fn default() -> Self {
        Self::new(LoadGauge::new())
    }
}

impl ConsolidationScheduler {
    pub fn new(load: LoadGauge) -> Self {
        Self {
            state: Mutex::new(SchedulerInner::default()),
            load,
            cancel: Mutex::new(CancelToken::new()),
        }
    }

    /// The gauge handlers use to report foreground load.
    pub fn load_gauge(&self) -> LoadGauge {
        self.load.clone()
    }

    /// Run consolidation now, holding the exclusive slot for the duration.
    pub fn trigger_now(
        &self,
        conn: &mut Connection,
        provider: &dyn EmbeddingProvider,
        user_id: &str,
        cfg: &ConsolidationConfig,
        decay_cfg: &DecayConfig,
        namespace: &str,
    ) -> MemoryResult<ConsolidationReport> {
        let cancel = self.acquire_slot(cfg)?;
        let started = Instant::now();

        let outcome = self.run_phases(
            conn, provider, user_id, cfg, decay_cfg, namespace, &cancel, started,
        );
        self.release_slot(&outcome);
        outcome
    }

    /// Request cancellation of the current run.
    pub fn cancel(&self) {
        self.cancel.lock().expect("cancel lock poisoned").cancel();
    }

    /// Consistent status snapshot; safe to call concurrently with a run.
    pub fn status(&self, batch_size: usize) -> SchedulerStatus {
        let inner = self.state.lock().expect("scheduler lock poisoned");
        SchedulerStatus {
            is_running: inner.is_running,
            last_run_at: inner.last_run_at.clone(),
            next_run_at: inner.next_run_at.clone(),
            current_progress: inner.progress.percent_complete,
            last_error: inner.last_error.clone(),
            retry_attempts: inner.retry_attempts,
            batch_size,
            detailed_progress: inner.progress.clone(),
        }
    }

    /// Record when the next cron-driven run is expected.
    pub fn set_next_run_at(&self, at: Option<String>) {
        self.state
            .lock()
            .expect("scheduler lock poisoned")
            .next_run_at = at;
    }

    /// Claim the exclusive slot or fail fast. Returns a fresh cancel token.
    fn acquire_slot(&self, cfg: &ConsolidationConfig) -> MemoryResult<CancelToken> {
        let mut inner = self.state.lock().expect("scheduler lock poisoned");
        if inner.is_running {
            return Err(MemoryError::JobInProgress);
        }
        if self.load.current() > cfg.max_concurrent_load {
            return Err(MemoryError::LoadThresholdExceeded);
        }
        inner.is_running = true;
        inner.progress = ConsolidationProgress {
            phase: ConsolidationPhase::Scanning,
            ..ConsolidationProgress::default()
        };

        let token = CancelToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = token.clone();
        Ok(token)
    }

    /// Leave the slot, recording success or failure.
    fn release_slot(&self, outcome: &MemoryResult<ConsolidationReport>) {
        let mut inner = self.state.lock().expect("scheduler lock poisoned");
        inner.is_running = false;
        inner.last_run_at = Some(chrono::Utc::now().to_rfc3339());
        match outcome {
            Ok(_) => {
                inner.retry_attempts = 0;
                inner.last_error = None;
                inner.progress.phase = ConsolidationPhase::Done;
                inner.progress.percent_complete = 100.0;
                inner.progress.estimated_remaining_ms = 0;
            }
            Err(MemoryError::Cancelled) => {
                inner.retry_attempts += 1;
                inner.last_error = Some("cancelled".to_string());
                inner.progress.phase = ConsolidationPhase::Idle;
            }
            Err(e) => {
                inner.retry_attempts += 1;
                inner.last_error = Some(e.to_string());
                inner.progress.phase = ConsolidationPhase::Idle;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phases(
        &self,
        conn: &mut Connection,
        provider: &dyn EmbeddingProvider,
        user_id: &str,
        cfg: &ConsolidationConfig,
        decay_cfg: &DecayConfig,
        namespace: &str,
        cancel: &CancelToken,
        started: Instant,
    ) -> MemoryResult<ConsolidationReport> {
        // Scanning → Clustering
        self.update_progress(|p| p.phase = ConsolidationPhase::Clustering);
        let clusters = consolidate::identify_clusters(conn, user_id, cfg, namespace)?;
        let memories_total: usize = clusters.iter().map(|c| c.len()).sum();
        self.update_progress(|p| {
            p.clusters_identified = clusters.len();
            p.memories_total = memories_total;
            p.phase = ConsolidationPhase::Summarising;
        });

        let mut on_progress = |clusters_done: usize, memories_done: usize| {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.update_progress(|p| {
                p.clusters_consolidated = clusters_done;
                p.memories_processed = memories_done;
                if p.memories_total > 0 {
                    let fraction = memories_done as f64 / p.memories_total as f64;
                    p.percent_complete = fraction * 100.0;
                    if fraction > 0.0 {
                        p.estimated_remaining_ms =
                            (elapsed_ms as f64 * (1.0 - fraction) / fraction) as u64;
                    }
                }
            });
        };

        let report = consolidate::consolidate_clusters(
            conn,
            provider,
            user_id,
            &clusters,
            cfg,
            decay_cfg,
            namespace,
            cancel,
            Some(&mut on_progress),
        )?;

        self.update_progress(|p| p.phase = ConsolidationPhase::Weakening);
        Ok(report)
    }

    fn update_progress(&self, f: impl FnOnce(&mut ConsolidationProgress)) {
        let mut inner = self.state.lock().expect("scheduler lock poisoned");
        f(&mut inner.progress);
    }
}
