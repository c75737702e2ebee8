//! Memory statistics for the CLI and the HTTP surface.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::MemoryResult;

/// Aggregate statistics for one user (or the whole store).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: usize,
    pub by_sector: HashMap<String, usize>,
    pub average_strength: f64,
    pub weak_count: usize,
    pub link_count: usize,
    pub reinforcement_events: usize,
}

/// Collect statistics, optionally scoped to a user.
pub fn collect_stats(conn: &Connection, user_id: Option<&str>) -> MemoryResult<MemoryStats> {
    let (scope_clause, scope_param) = match user_id {
        Some(user) => (" WHERE user_id = ?1", Some(user.to_string())),
        None => ("", None),
    };

    let mut by_sector = HashMap::new();
    let mut total = 0usize;
    {
        let sql = format!(
            "SELECT primary_sector, COUNT(*) FROM memories{scope_clause} GROUP BY primary_sector"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, i64)> = match &scope_param {
            Some(user) => stmt
                .query_map(params![user], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?,
        };
        for (sector, count) in rows {
            let count = count as usize;
            total += count;
            by_sector.insert(sector, count);
        }
    }

    let (average_strength, weak_count): (f64, usize) = {
        let sql = format!(
            "SELECT COALESCE(AVG(strength), 0.0), \
             COALESCE(SUM(CASE WHEN strength < 0.2 THEN 1 ELSE 0 END), 0) \
             FROM memories{scope_clause}"
        );
        let (avg, weak): (f64, i64) = match &scope_param {
            Some(user) => conn.query_row(&sql, params![user], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?,
            None => conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?,
        };
        (avg, weak as usize)
    };

    let link_count: usize = conn.query_row("SELECT COUNT(*) FROM memory_links", [], |row| {
        row.get::<_, i64>(0)
    })? as usize;
    let reinforcement_events: usize = conn.query_row(
        "SELECT COUNT(*) FROM memory_reinforcement_history",
        [],
        |row| row.get::<_, i64>(0),
    )? as usize;

    Ok(MemoryStats {
        total,
        by_sector,
        average_strength,
        weak_count,
        link_count,
        reinforcement_events,
    })
}
