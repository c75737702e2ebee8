use anyhow::Result;
use std::sync::Arc;

use crate::config::EngramConfig;
use crate::memory::search::{search, SearchQuery};

/// Search memories from the terminal.
pub async fn run(config: &EngramConfig, user_id: &str, query_text: &str) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let provider = crate::embedding::create_provider(&config.embedding)?;
    let provider: Arc<dyn crate::embedding::EmbeddingProvider> = Arc::from(provider);

    let query = SearchQuery {
        user_id: user_id.to_string(),
        text: Some(query_text.to_string()),
        ..SearchQuery::default()
    };

    let search_cfg = config.search.clone();
    let namespace = config.storage.namespace.clone();
    let response = tokio::task::spawn_blocking(move || {
        search(&conn, provider.as_ref(), &query, &search_cfg, &namespace)
    })
    .await??;

    if response.results.is_empty() {
        println!("No memories matched.");
        return Ok(());
    }

    println!(
        "{} result(s) of {} matched:\n",
        response.results.len(),
        response.total_matched
    );
    for hit in &response.results {
        println!(
            "[{:.3}] ({}) {}  sim={:.2} str={:.2}",
            hit.score,
            hit.primary_sector,
            preview(&hit.content, 70),
            hit.similarity,
            hit.strength,
        );
        println!("        id={}", hit.id);
    }

    Ok(())
}

fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let prefix: String = content.chars().take(max_chars).collect();
        format!("{prefix}...")
    }
}
