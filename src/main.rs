mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use faq_assistant::app::App;
use faq_assistant::config::FaqConfig;
use faq_assistant::server;

#[derive(Parser)]
#[command(
    name = "faq",
    version,
    about = "FAQ assistant: knowledge-base answers with generative fallback"
)]
struct Cli {
    /// Config file (defaults to ~/.faq-assistant/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap, seed, start write-back workers, and answer JSON-line questions on stdin
    Serve,
    /// Answer one question and print the result as JSON
    Ask {
        question: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Process write-back tasks
    Worker {
        /// Drain pending tasks and exit instead of running until interrupted
        #[arg(long)]
        once: bool,
    },
    /// Create the database and schema, then load the seed file
    Bootstrap,
    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Inspect and remove knowledge-base entries
    Entries {
        #[command(subcommand)]
        action: EntryAction,
    },
    /// Manage the write-back queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Show knowledge-base and queue statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Check database health
    Doctor,
    /// Manage the local embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    List {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    Create {
        name: String,
    },
    Rename {
        from: String,
        to: String,
    },
    /// Delete a collection and all of its entries
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum EntryAction {
    List {
        #[arg(long)]
        collection: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Delete the entry whose stored question is exactly CONTENT
    Delete {
        content: String,
        #[arg(long)]
        collection: Option<String>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Move failed tasks back to pending
    Requeue,
    /// Remove completed tasks
    Purge,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download all-MiniLM-L6-v2 for the local embedding provider
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FaqConfig::load_from(path)?,
        None => FaqConfig::load()?,
    };

    // stdout carries the JSON-line protocol; logs go to stderr.
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            let app = App::from_config(config).await?;
            app.seed().await.context("seeding failed")?;
            server::serve_stdio(app).await?;
        }
        Command::Ask {
            question,
            collection,
        } => {
            let app = App::from_config(config).await?;
            let answer = app.router.answer(&question, collection.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
            // apply the write-back before exiting
            app.drain().await?;
        }
        Command::Worker { once } => {
            let app = App::from_config(config).await?;
            if once {
                let report = app.drain().await?;
                println!("{} done, {} failed", report.done, report.failed);
            } else {
                let cancel = CancellationToken::new();
                let workers = app.start_workers(cancel.clone()).await?;
                tokio::signal::ctrl_c().await?;
                tracing::info!("interrupt received; stopping workers");
                workers.shutdown().await;
            }
        }
        Command::Bootstrap => {
            let app = App::from_config(config).await?;
            let b = &app.bootstrap;
            println!(
                "database {}, schema {} ({} attempt(s))",
                if b.database_created { "created" } else { "present" },
                if b.schema_created { "created" } else { "present" },
                b.attempts
            );
            match app.seed().await? {
                Some(report) => println!(
                    "seeded: {} inserted, {} skipped",
                    report.inserted, report.skipped
                ),
                None => println!("no seed file configured"),
            }
        }
        Command::Collections { action } => match action {
            CollectionAction::List { limit } => cli::admin::list_collections(&config, limit).await?,
            CollectionAction::Create { name } => cli::admin::create_collection(&config, name).await?,
            CollectionAction::Rename { from, to } => {
                cli::admin::rename_collection(&config, from, to).await?
            }
            CollectionAction::Delete { name } => cli::admin::delete_collection(&config, name).await?,
        },
        Command::Entries { action } => match action {
            EntryAction::List {
                collection,
                limit,
                json,
            } => cli::admin::list_entries(&config, collection, limit, json).await?,
            EntryAction::Delete {
                content,
                collection,
            } => cli::admin::delete_entry(&config, content, collection).await?,
        },
        Command::Queue { action } => match action {
            QueueAction::Requeue => cli::admin::requeue_failed(&config).await?,
            QueueAction::Purge => cli::admin::purge_done(&config).await?,
        },
        Command::Stats { json } => cli::stats::stats(&config, json).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
