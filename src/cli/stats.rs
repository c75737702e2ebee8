use anyhow::Result;

use crate::config::EngramConfig;
use crate::memory::stats::collect_stats;

/// Display memory statistics, optionally scoped to a user.
pub fn stats(config: &EngramConfig, user_id: Option<&str>) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let stats = collect_stats(&conn, user_id)?;

    match user_id {
        Some(user) => println!("Memory statistics for {user}:"),
        None => println!("Memory statistics (all users):"),
    }
    println!("  Total memories:       {}", stats.total);
    for (sector, count) in &stats.by_sector {
        println!("    {sector:<12} {count}");
    }
    println!("  Average strength:     {:.3}", stats.average_strength);
    println!("  Weak (< 0.2):         {}", stats.weak_count);
    println!("  Waypoint links:       {}", stats.link_count);
    println!("  Reinforcement events: {}", stats.reinforcement_events);

    Ok(())
}
