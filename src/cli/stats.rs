use anyhow::Result;
use serde::Serialize;

use faq_assistant::config::FaqConfig;
use faq_assistant::db::{self, HealthReport};
use faq_assistant::knowledge::collections;
use faq_assistant::knowledge::types::Collection;
use faq_assistant::writeback::queue::{self, QueueStats};

#[derive(Debug, Serialize)]
struct Stats {
    health: HealthReport,
    collections: Vec<Collection>,
    queue: QueueStats,
}

/// Print entry counts per collection, queue depth, and store metadata.
pub async fn stats(config: &FaqConfig, json: bool) -> Result<()> {
    let store = super::admin::open_store(config).await?;
    let stats = store
        .run(|conn| {
            Ok(Stats {
                health: db::check_database_health(conn)?,
                collections: collections::list_collections(conn, usize::MAX)?,
                queue: queue::queue_stats(conn)?,
            })
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let h = &stats.health;
    println!("Knowledge Base Statistics");
    println!("{}", "=".repeat(40));
    println!("  Schema version:      {}", h.schema_version);
    println!("  sqlite-vec:          {}", h.sqlite_vec_version);
    println!(
        "  Embedding model:     {}",
        h.embedding_model.as_deref().unwrap_or("(not set)")
    );
    if let Some(dim) = h.embedding_dim {
        println!("  Embedding dims:      {dim}");
    }
    println!("  Total entries:       {}", h.entry_count);
    println!();

    println!("Collections:");
    if stats.collections.is_empty() {
        println!("  (none)");
    }
    for c in &stats.collections {
        println!("  {:<28} {}", c.name, c.entry_count);
    }
    println!();

    let q = &stats.queue;
    println!("Write-back queue:");
    println!("  Pending:             {}", q.pending);
    println!("  Running:             {}", q.running);
    println!("  Done:                {}", q.done);
    println!("  Failed:              {}", q.failed);

    Ok(())
}
