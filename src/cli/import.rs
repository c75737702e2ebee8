use anyhow::{Context, Result};
use std::path::Path;

use crate::config::EngramConfig;
use crate::memory::export::{import_memories, validate_import, ImportMode, ImportOptions};

/// Import memories from a JSON export file.
pub fn import(
    config: &EngramConfig,
    user_id: &str,
    file: &Path,
    replace: bool,
    regenerate_embeddings: bool,
) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read import file: {}", file.display()))?;
    let data: serde_json::Value =
        serde_json::from_str(&json).context("failed to parse import JSON")?;

    // Dry validation first, so a bad file is reported in full before any write.
    let validation = validate_import(&data, regenerate_embeddings);
    if !validation.valid {
        eprintln!("Import file is invalid:");
        for error in &validation.errors {
            eprintln!("  {}: {}", error.path, error.message);
        }
        anyhow::bail!("{} validation error(s)", validation.errors.len());
    }

    let mut conn = crate::db::open_database(config.resolved_db_path())?;
    let provider = crate::embedding::create_provider(&config.embedding)?;

    let report = import_memories(
        &mut conn,
        provider.as_ref(),
        user_id,
        &data,
        ImportOptions {
            mode: if replace {
                ImportMode::Replace
            } else {
                ImportMode::Merge
            },
            regenerate_embeddings,
        },
        &config.decay,
        &config.storage.namespace,
    )?;

    println!("Import complete:");
    println!("  Imported: {}", report.imported_count);
    println!("  Skipped:  {}", report.skipped_count);
    if report.error_count > 0 {
        println!("  Errors:   {}", report.error_count);
        for error in &report.errors {
            println!("    {}: {}", error.memory_id, error.error);
        }
    }

    Ok(())
}
