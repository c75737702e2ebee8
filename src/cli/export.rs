use anyhow::Result;

use crate::config::EngramConfig;
use crate::memory::export::{export_memories, ExportFilter};

/// Export a user's memories as JSON to stdout.
pub fn export(config: &EngramConfig, user_id: &str) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;

    let envelope = export_memories(
        &conn,
        user_id,
        &ExportFilter::default(),
        &config.storage.namespace,
    )?;

    let json = serde_json::to_string_pretty(&envelope)?;
    println!("{json}");

    eprintln!("Exported {} memories for {user_id}.", envelope.count);
    Ok(())
}
