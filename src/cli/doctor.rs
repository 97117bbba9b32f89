//! `faq doctor`: database diagnostics.

use anyhow::{Context, Result};

use faq_assistant::config::FaqConfig;
use faq_assistant::db;

pub fn doctor(config: &FaqConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `faq bootstrap` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let pool = db::open_pool(&db_path, &config.storage)
        .context("failed to open database (may be corrupt)")?;
    let conn = pool.get().context("failed to acquire a connection")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("FAQ Assistant Health Report");
    println!("===========================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embedding:");
    println!(
        "  Stored:          {} ({} dims)",
        report.embedding_model.as_deref().unwrap_or("(not set)"),
        report
            .embedding_dim
            .map(|d| d.to_string())
            .unwrap_or_else(|| "?".into())
    );
    println!(
        "  Configured:      {} ({} dims)",
        config.embedding.model, config.embedding.dimensions
    );
    if let Some(dim) = report.embedding_dim {
        if dim != config.embedding.dimensions {
            println!("  ERROR: dimension mismatch; the store cannot accept these vectors.");
        }
    }
    if let Some(ref stored) = report.embedding_model {
        if stored != &config.embedding.model {
            println!("  WARNING: model mismatch; similarity scores will be unreliable.");
        }
    }
    println!();
    println!("Row counts:");
    println!("  Entries:         {}", report.entry_count);
    println!("  Collections:     {}", report.collection_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Restore the database from a backup, or delete it and run");
        println!("`faq bootstrap` to reseed from the configured FAQ file.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
