//! Temporal decay and reinforcement engine.
//!
//! Strength follows a single law: exponential decay in the days since last
//! access, at a rate of `base_lambda × sector_multiplier`, clamped to the
//! configured floor. Reinforcement moves strength the other way, capped at
//! 1.0, with every event appended to `memory_reinforcement_history`. A
//! reinforcement within an hour of the previous event (of any type) earns a
//! diminished 50% boost.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::config::DecayConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::store::write_audit_log;
use crate::memory::types::{ReinforcementEvent, ReinforcementType, Sector};

/// Milliseconds per day.
const DAY_MS: f64 = 86_400_000.0;

/// Window inside which a repeat reinforcement is diminished.
const DIMINISHING_WINDOW_MS: i64 = 3_600_000;

/// A computed strength update for one row, applied by [`batch_apply_decay`].
#[derive(Debug, Clone)]
pub struct DecayUpdate {
    pub memory_id: String,
    pub strength: f64,
}

/// Outcome of one reinforcement event.
#[derive(Debug, Clone)]
pub struct ReinforcementOutcome {
    pub memory_id: String,
    pub event_type: ReinforcementType,
    pub boost: f64,
    pub strength_before: f64,
    pub strength_after: f64,
    pub created_at: String,
}

// ── Decay ────────────────────────────────────────────────────────────────────

/// The decay formula. Zero or negative age leaves strength unchanged; a
/// strength already at or below the floor is left alone (soft-deleted rows
/// must not resurrect to the floor).
pub fn calculate_decayed_strength(
    strength: f64,
    last_accessed: &str,
    sector: Sector,
    now: DateTime<Utc>,
    cfg: &DecayConfig,
) -> f64 {
    let Ok(t0) = DateTime::parse_from_rfc3339(last_accessed) else {
        return strength;
    };
    let age_ms = (now - t0.with_timezone(&Utc)).num_milliseconds() as f64;
    if age_ms <= 0.0 {
        return strength;
    }
    if strength <= cfg.minimum_strength {
        return strength;
    }
    let age_days = age_ms / DAY_MS;
    let lambda = cfg.effective_decay_rate(sector);
    let raw = strength * (-lambda * age_days).exp();
    raw.max(cfg.minimum_strength)
}

/// Apply decay to a single memory in one short transaction.
///
/// Updates `strength` and resets `last_accessed` to the tick time. Returns
/// the new strength.
pub fn apply_decay(
    conn: &mut Connection,
    memory_id: &str,
    cfg: &DecayConfig,
) -> MemoryResult<f64> {
    let tx = conn.transaction()?;

    let row: Option<(f64, String, String)> = tx
        .query_row(
            "SELECT strength, last_accessed, primary_sector FROM memories WHERE id = ?1",
            params![memory_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((strength, last_accessed, sector)) = row else {
        return Err(MemoryError::NotFound {
            id: memory_id.to_string(),
        });
    };
    let sector: Sector = sector
        .parse()
        .map_err(|e: String| MemoryError::StorageFailed(e))?;

    let now = Utc::now();
    let new_strength = calculate_decayed_strength(strength, &last_accessed, sector, now, cfg);

    tx.execute(
        "UPDATE memories SET strength = ?1, last_accessed = ?2 WHERE id = ?3",
        params![new_strength, now.to_rfc3339(), memory_id],
    )?;
    write_audit_log(
        &tx,
        "decay",
        memory_id,
        Some(&serde_json::json!({"before": strength, "after": new_strength})),
    )?;
    tx.commit()?;

    Ok(new_strength)
}

/// Apply precomputed decay updates in one transaction.
///
/// Empty input performs no work and opens no transaction. Any row error
/// rolls back the whole batch.
pub fn batch_apply_decay(
    conn: &mut Connection,
    updates: &[DecayUpdate],
) -> MemoryResult<usize> {
    if updates.is_empty() {
        return Ok(0);
    }

    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "UPDATE memories SET strength = ?1, last_accessed = ?2 WHERE id = ?3",
        )?;
        for update in updates {
            stmt.execute(params![update.strength, now, update.memory_id])?;
        }
    }
    tx.commit()?;
    Ok(updates.len())
}

// ── Reinforcement ────────────────────────────────────────────────────────────

/// Explicit reinforcement: `new = min(current + boost, 1.0)`.
pub fn reinforce_memory(
    conn: &mut Connection,
    memory_id: &str,
    boost: f64,
) -> MemoryResult<ReinforcementOutcome> {
    let tx = conn.transaction()?;
    let outcome = apply_reinforcement(&tx, memory_id, ReinforcementType::Explicit, boost, false)?;
    tx.commit()?;
    Ok(outcome)
}

/// Access-triggered reinforcement with diminishing returns.
///
/// The default boost is halved when the most recent reinforcement event of
/// any type is under an hour old. Also bumps `last_accessed` and
/// `access_count`.
pub fn auto_reinforce_on_access(
    conn: &mut Connection,
    memory_id: &str,
    cfg: &DecayConfig,
) -> MemoryResult<ReinforcementOutcome> {
    let tx = conn.transaction()?;
    let boost = diminished_boost(&tx, memory_id, cfg.reinforcement_boost)?;
    let outcome = apply_reinforcement(&tx, memory_id, ReinforcementType::Access, boost, true)?;
    tx.commit()?;
    Ok(outcome)
}

/// Reinforce by a caller-supplied type string.
///
/// `access` uses the diminished default boost; `explicit` requires a boost;
/// `importance` derives the boost from the stored importance (default 0.5)
/// times 0.5; anything else is `InvalidReinforcementType`.
pub fn reinforce_memory_by_type(
    conn: &mut Connection,
    memory_id: &str,
    reinforcement_type: &str,
    boost: Option<f64>,
    cfg: &DecayConfig,
) -> MemoryResult<ReinforcementOutcome> {
    match reinforcement_type {
        "access" => auto_reinforce_on_access(conn, memory_id, cfg),
        "explicit" => {
            let boost = boost.ok_or(MemoryError::BoostRequired)?;
            reinforce_memory(conn, memory_id, boost)
        }
        "importance" => {
            let tx = conn.transaction()?;
            let importance: Option<f64> = tx
                .query_row(
                    "SELECT importance FROM memory_metadata WHERE memory_id = ?1",
                    params![memory_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let boost = importance.unwrap_or(0.5) * 0.5;
            let outcome =
                apply_reinforcement(&tx, memory_id, ReinforcementType::Importance, boost, false)?;
            tx.commit()?;
            Ok(outcome)
        }
        other => Err(MemoryError::InvalidReinforcementType(other.to_string())),
    }
}

/// Reinforcement history for a memory, newest first.
pub fn get_reinforcement_history(
    conn: &Connection,
    memory_id: &str,
) -> MemoryResult<Vec<ReinforcementEvent>> {
    let mut stmt = conn.prepare(
        "SELECT memory_id, event_type, boost, strength_before, strength_after, created_at \
         FROM memory_reinforcement_history \
         WHERE memory_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let events = stmt
        .query_map(params![memory_id], |row| {
            let event_type: String = row.get(1)?;
            Ok(ReinforcementEvent {
                memory_id: row.get(0)?,
                event_type: event_type
                    .parse()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                boost: row.get(2)?,
                strength_before: row.get(3)?,
                strength_after: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Halve the boost when the newest history event is inside the window.
///
/// The `(memory_id, created_at DESC)` index keeps this O(1).
fn diminished_boost(tx: &Transaction, memory_id: &str, base_boost: f64) -> MemoryResult<f64> {
    let latest: Option<String> = tx
        .query_row(
            "SELECT created_at FROM memory_reinforcement_history \
             WHERE memory_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
            params![memory_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(latest) = latest else {
        return Ok(base_boost);
    };
    let Ok(latest) = DateTime::parse_from_rfc3339(&latest) else {
        return Ok(base_boost);
    };
    let elapsed_ms = (Utc::now() - latest.with_timezone(&Utc)).num_milliseconds();
    if elapsed_ms < DIMINISHING_WINDOW_MS {
        Ok(base_boost * 0.5)
    } else {
        Ok(base_boost)
    }
}

/// Shared reinforcement path: cap at 1.0, log the event, update the row.
fn apply_reinforcement(
    tx: &Transaction,
    memory_id: &str,
    event_type: ReinforcementType,
    boost: f64,
    bump_access_count: bool,
) -> MemoryResult<ReinforcementOutcome> {
    let strength_before: Option<f64> = tx
        .query_row(
            "SELECT strength FROM memories WHERE id = ?1",
            params![memory_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(strength_before) = strength_before else {
        return Err(MemoryError::NotFound {
            id: memory_id.to_string(),
        });
    };

    let strength_after = (strength_before + boost).min(1.0);
    let now = Utc::now().to_rfc3339();

    if bump_access_count {
        tx.execute(
            "UPDATE memories SET strength = ?1, last_accessed = ?2, access_count = access_count + 1 \
             WHERE id = ?3",
            params![strength_after, now, memory_id],
        )?;
    } else {
        tx.execute(
            "UPDATE memories SET strength = ?1, last_accessed = ?2 WHERE id = ?3",
            params![strength_after, now, memory_id],
        )?;
    }

    tx.execute(
        "INSERT INTO memory_reinforcement_history \
         (memory_id, event_type, boost, strength_before, strength_after, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            memory_id,
            event_type.as_str(),
            boost,
            strength_before,
            strength_after,
            now
        ],
    )?;
    write_audit_log(
        tx,
        "reinforce",
        memory_id,
        Some(&serde_json::json!({"type": event_type.as_str(), "boost": boost})),
    )?;

    Ok(ReinforcementOutcome {
        memory_id: memory_id.to_string(),
        event_type,
        boost,
        strength_before,
        strength_after,
        created_at: now,
    })
}
