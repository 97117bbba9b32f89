//! `faq collections`, `faq entries` and `faq queue`: knowledge-base administration.
//!
//! None of these need an embedding provider or API key; they talk to the
//! store directly.

use anyhow::{Context, Result};

use faq_assistant::app;
use faq_assistant::config::FaqConfig;
use faq_assistant::embedding;
use faq_assistant::knowledge::{collections, store, KnowledgeStore};
use faq_assistant::writeback::queue;

/// Bootstrap (idempotently) and return a store handle.
pub async fn open_store(config: &FaqConfig) -> Result<KnowledgeStore> {
    let model = embedding::configured_model(&config.embedding);
    let (store, _) = app::bootstrap_store(config, model)
        .await
        .context("failed to open knowledge base")?;
    Ok(store)
}

pub async fn list_collections(config: &FaqConfig, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let all = store
        .run(move |conn| collections::list_collections(conn, limit))
        .await?;

    if all.is_empty() {
        println!("No collections.");
        return Ok(());
    }
    println!("{:<32} {:>8}  CREATED", "NAME", "ENTRIES");
    for c in all {
        println!("{:<32} {:>8}  {}", c.name, c.entry_count, c.created_at);
    }
    Ok(())
}

pub async fn create_collection(config: &FaqConfig, name: String) -> Result<()> {
    let store = open_store(config).await?;
    let label = name.clone();
    let created = store
        .run(move |conn| collections::create_collection(conn, &name))
        .await?;
    if created {
        println!("Created collection '{label}'.");
    } else {
        println!("Collection '{label}' already exists.");
    }
    Ok(())
}

pub async fn rename_collection(config: &FaqConfig, from: String, to: String) -> Result<()> {
    let store = open_store(config).await?;
    let msg = format!("Renamed '{from}' to '{to}'");
    let moved = store
        .run(move |conn| collections::rename_collection(conn, &from, &to))
        .await?;
    println!("{msg} ({moved} entries moved).");
    Ok(())
}

pub async fn delete_collection(config: &FaqConfig, name: String) -> Result<()> {
    let store = open_store(config).await?;
    let label = name.clone();
    let removed = store
        .run(move |conn| collections::delete_collection(conn, &name))
        .await?;
    println!("Deleted collection '{label}' ({removed} entries removed).");
    Ok(())
}

pub async fn list_entries(
    config: &FaqConfig,
    collection: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let collection = collection.unwrap_or_else(|| config.matching.default_collection.clone());
    let label = collection.clone();
    let entries = store
        .run(move |conn| store::list_entries(conn, &collection, limit))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No entries in '{label}'.");
        return Ok(());
    }
    for e in entries {
        println!("[{}] Q: {}", e.id, e.content);
        println!("     A: {}", truncate(&e.answer, 120));
    }
    Ok(())
}

pub async fn delete_entry(
    config: &FaqConfig,
    content: String,
    collection: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;
    let collection = collection.unwrap_or_else(|| config.matching.default_collection.clone());
    let label = collection.clone();
    store
        .run(move |conn| store::delete_entry(conn, &content, &collection))
        .await?;
    println!("Deleted entry from '{label}'.");
    Ok(())
}

pub async fn requeue_failed(config: &FaqConfig) -> Result<()> {
    let store = open_store(config).await?;
    let n = queue::WritebackQueue::new(store).requeue_failed().await?;
    println!("Requeued {n} failed task(s).");
    Ok(())
}

pub async fn purge_done(config: &FaqConfig) -> Result<()> {
    let store = open_store(config).await?;
    let n = store.run(|conn| queue::purge_done(conn)).await?;
    println!("Purged {n} completed task(s).");
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
