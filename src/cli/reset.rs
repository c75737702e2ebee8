use anyhow::Result;
use std::io::Write;

use crate::config::EngramConfig;

/// Delete all memories after an interactive confirmation.
pub fn reset(config: &EngramConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    if !db_path.exists() {
        println!("No database at {} — nothing to reset.", db_path.display());
        return Ok(());
    }

    print!(
        "This will permanently delete ALL memories in {}. Type 'yes' to continue: ",
        db_path.display()
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if answer.trim() != "yes" {
        println!("Aborted.");
        return Ok(());
    }

    std::fs::remove_file(&db_path)?;
    // WAL sidecar files, if present.
    for suffix in ["-wal", "-shm"] {
        let sidecar = db_path.with_file_name(format!(
            "{}{suffix}",
            db_path.file_name().unwrap_or_default().to_string_lossy()
        ));
        let _ = std::fs::remove_file(sidecar);
    }

    println!("Database deleted. A fresh one will be created on next use.");
    Ok(())
}
