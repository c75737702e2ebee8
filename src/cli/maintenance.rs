//! CLI maintenance commands — decay maintenance and consolidation.

use anyhow::Result;

use crate::config::EngramConfig;
use crate::memory::{consolidate, maintenance, CancelToken};

/// Run one decay maintenance tick: batch decay + pruning.
pub fn maintain(config: &EngramConfig) -> Result<()> {
    let mut conn = crate::db::open_database(config.resolved_db_path())?;

    println!("Running decay maintenance...");
    let report = maintenance::run_decay_maintenance(
        &mut conn,
        &config.decay,
        &config.storage.namespace,
        &CancelToken::new(),
    )?;

    println!("  Processed: {}", report.processed_count);
    println!("  Pruned:    {}", report.pruned_count);
    println!("  Took:      {}ms", report.processing_time_ms);
    if !report.errors.is_empty() {
        println!("  Errors ({}):", report.errors.len());
        for error in &report.errors {
            println!("    {error}");
        }
    }

    Ok(())
}

/// Run consolidation for a user from the terminal.
pub fn consolidate_user(config: &EngramConfig, user_id: &str) -> Result<()> {
    let mut conn = crate::db::open_database(config.resolved_db_path())?;
    let provider = crate::embedding::create_provider(&config.embedding)?;

    println!("Consolidating episodic memories for {user_id}...");
    let report = consolidate::consolidate(
        &mut conn,
        provider.as_ref(),
        user_id,
        &config.consolidation,
        &config.decay,
        &config.storage.namespace,
        &CancelToken::new(),
    )?;

    if report.clusters_processed == 0 {
        println!("No clusters eligible for consolidation.");
        return Ok(());
    }

    println!(
        "  Consolidated {} memories across {} clusters.",
        report.total_consolidated, report.clusters_processed,
    );
    for outcome in &report.results {
        println!(
            "    {} <- {} sources",
            outcome.summary_id,
            outcome.consolidated_ids.len()
        );
    }
    if !report.errors.is_empty() {
        println!("  Errors ({}):", report.errors.len());
        for error in &report.errors {
            println!("    {error}");
        }
    }

    Ok(())
}
