//! Scheduled decay maintenance and pruning.
//!
//! [`run_decay_maintenance`] streams every memory in batches of
//! `maintenance_batch_size` (1000 by default), applies batch decay per batch
//! (collecting per-batch errors without aborting the run), then prunes weak
//! low-importance memories in one cascading transaction. A cancellation
//! token is polled at batch boundaries.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::time::Instant;

use crate::config::DecayConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::decay::{batch_apply_decay, calculate_decayed_strength, DecayUpdate};
use crate::memory::store::write_audit_log;
use crate::memory::types::Sector;
use crate::memory::{embeddings, CancelToken};

/// Importance at or above this protects a weak memory from pruning.
const PRUNE_IMPORTANCE_CEILING: f64 = 0.3;

/// Outcome of one maintenance run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub processed_count: usize,
    pub pruned_count: usize,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
}

/// A validated decay schedule, wired to a periodic task in serve mode.
#[derive(Debug, Clone)]
pub struct DecaySchedule {
    pub expression: String,
}

impl DecaySchedule {
    /// Coarse polling interval derived from the expression: `*/n`-minute
    /// schedules poll every n minutes, wildcard-hour schedules hourly,
    /// everything else daily.
    pub fn tick_interval(&self) -> std::time::Duration {
        let fields: Vec<&str> = self.expression.split_whitespace().collect();
        let minutes = match fields.as_slice() {
            [minute, ..] if minute.starts_with("*/") => {
                minute[2..].parse::<u64>().unwrap_or(60).max(1)
            }
            [_, "*", ..] => 60,
            _ => 24 * 60,
        };
        std::time::Duration::from_secs(minutes * 60)
    }
}

/// Validate a cron expression for the decay job.
///
/// Expects five whitespace-separated fields of digits and `* / , -`.
pub fn schedule_decay_job(expression: &str) -> MemoryResult<DecaySchedule> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(MemoryError::InvalidCronExpression(expression.to_string()));
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(MemoryError::InvalidCronExpression(expression.to_string()));
    }
    for field in &fields {
        if !field
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-'))
        {
            return Err(MemoryError::InvalidCronExpression(expression.to_string()));
        }
    }
    Ok(DecaySchedule {
        expression: trimmed.to_string(),
    })
}

/// One full maintenance tick: decay everything, then prune.
pub fn run_decay_maintenance(
    conn: &mut Connection,
    cfg: &DecayConfig,
    namespace: &str,
    cancel: &CancelToken,
) -> MemoryResult<MaintenanceReport> {
    let started = Instant::now();
    let now = chrono::Utc::now();
    let mut processed_count = 0usize;
    let mut errors: Vec<String> = Vec::new();

    // 1. Stream all memories in batches, keyset-paginated on id.
    let mut last_id = String::new();
    loop {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }

        let rows: Vec<(String, f64, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, strength, last_accessed, primary_sector FROM memories \
                 WHERE id > ?1 ORDER BY id LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(
                    params![last_id, cfg.maintenance_batch_size as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        if rows.is_empty() {
            break;
        }
        last_id = rows.last().expect("non-empty").0.clone();

        let updates: Vec<DecayUpdate> = rows
            .iter()
            .filter_map(|(id, strength, last_accessed, sector)| {
                let sector: Sector = sector.parse().ok()?;
                Some(DecayUpdate {
                    memory_id: id.clone(),
                    strength: calculate_decayed_strength(
                        *strength,
                        last_accessed,
                        sector,
                        now,
                        cfg,
                    ),
                })
            })
            .collect();

        // 2. Per-batch errors are recorded, not fatal.
        match batch_apply_decay(conn, &updates) {
            Ok(applied) => processed_count += applied,
            Err(e) => {
                tracing::warn!(error = %e, "decay batch failed");
                errors.push(e.to_string());
            }
        }
    }

    // 3. Prune weak, unimportant memories.
    let candidates = identify_pruning_candidates(conn, cfg.pruning_threshold)?;
    let pruned_count = if candidates.is_empty() {
        0
    } else {
        prune_memories(conn, &candidates, namespace)?
    };

    let report = MaintenanceReport {
        processed_count,
        pruned_count,
        processing_time_ms: started.elapsed().as_millis() as u64,
        errors,
    };
    tracing::info!(
        processed = report.processed_count,
        pruned = report.pruned_count,
        errors = report.errors.len(),
        "decay maintenance finished"
    );
    Ok(report)
}

/// Memories below the strength threshold whose importance is absent or below
/// the ceiling.
pub fn identify_pruning_candidates(
    conn: &Connection,
    pruning_threshold: f64,
) -> MemoryResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT m.id FROM memories m \
         LEFT JOIN memory_metadata md ON md.memory_id = m.id \
         WHERE m.strength < ?1 \
           AND (md.importance IS NULL OR md.importance < ?2) \
         ORDER BY m.id",
    )?;
    let ids = stmt
        .query_map(params![pruning_threshold, PRUNE_IMPORTANCE_CEILING], |row| {
            row.get(0)
        })?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Hard-delete the given ids in one transaction, cascading embeddings,
/// metadata, links, and reinforcement history.
pub fn prune_memories(
    conn: &mut Connection,
    memory_ids: &[String],
    namespace: &str,
) -> MemoryResult<usize> {
    if memory_ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for memory_id in memory_ids {
        embeddings::delete(&tx, memory_id, namespace)?;
        write_audit_log(
            &tx,
            "prune",
            memory_id,
            Some(&serde_json::json!({"reason": "below pruning threshold"})),
        )?;
        tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;
    }
    tx.commit()?;

    Ok(memory_ids.len())
}
