//! dedup-engine - operator maintenance entry points
//!
//! Re-verification and recovery commands over the deduplication database.
//! No matcher transport is bundled, so commands that talk to the matcher are
//! driven by the embedding service, not from here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dedup_common::config::{load_default_toml_config, load_toml_config, resolve_database_path};
use dedup_common::events::EventBus;
use dedup_engine::db::{imports, persons};
use dedup_engine::models::DuplicateStatus;
use dedup_engine::services::{DomainLocks, ImportTransitions};
use dedup_engine::DedupSettings;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Command-line arguments for dedup-engine
#[derive(Parser, Debug)]
#[command(name = "dedup-engine")]
#[command(about = "Beneficiary deduplication maintenance tool")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, env = "DEDUP_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute batch and population statistics for one import
    Recompute {
        #[arg(long)]
        import: Uuid,
    },
    /// Recompute population statistics of every merged import in a domain
    RecomputeDomain {
        #[arg(long)]
        domain: Uuid,
        /// Import to leave untouched
        #[arg(long)]
        exclude: Option<Uuid>,
    },
    /// Reset a failed import to pending
    Retry {
        #[arg(long)]
        import: Uuid,
    },
    /// Show an import's deduplication status and counters
    Status {
        #[arg(long)]
        import: Uuid,
    },
}

#[derive(Serialize)]
struct StatusReport {
    import_id: Uuid,
    name: String,
    status: String,
    error_message: Option<String>,
    run_id: i64,
    tickets_created: bool,
    merged: bool,
    batch_duplicates: u32,
    golden_record_duplicates: u32,
    persons: usize,
    duplicate_in_batch: usize,
    duplicate: usize,
    not_processed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match &args.config {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => load_default_toml_config().context("Failed to load default config")?,
    };

    dedup_common::logging::init_tracing(&toml_config.logging)?;

    let db_path = resolve_database_path(args.database.as_deref(), "DEDUP_DATABASE", &toml_config);
    info!("Database: {}", db_path.display());

    let pool = dedup_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let settings = DedupSettings::load(&pool).await?;
    let event_bus = EventBus::new(100);

    match args.command {
        Command::Recompute { import } => {
            let locks = DomainLocks::new();
            let (_, aggregator) =
                dedup_engine::build_aggregator(&pool, &settings, &locks, &event_bus);
            let stats = aggregator.recompute_for_import(import).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::RecomputeDomain { domain, exclude } => {
            let locks = DomainLocks::new();
            let (_, aggregator) =
                dedup_engine::build_aggregator(&pool, &settings, &locks, &event_bus);
            let stats = aggregator
                .recompute_for_domain_excluding(domain, exclude)
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Retry { import } => {
            let transitions = ImportTransitions::new(pool.clone()).with_events(event_bus.clone());
            let import = transitions.retry(import).await?;
            println!("Import {} reset to {}", import.id, import.status);
        }
        Command::Status { import } => {
            let import = imports::require_import(&pool, import).await?;
            let members = persons::load_for_import(&pool, import.id).await?;
            let count = |status: DuplicateStatus, batch: bool| {
                members
                    .iter()
                    .filter(|p| {
                        if batch {
                            p.batch_status == status
                        } else {
                            p.population_status == status
                        }
                    })
                    .count()
            };

            let report = StatusReport {
                import_id: import.id,
                name: import.name.clone(),
                status: import.status.to_string(),
                error_message: import.error_message.clone(),
                run_id: import.run_id,
                tickets_created: import.tickets_run_id == Some(import.run_id),
                merged: import.merged,
                batch_duplicates: import.batch_duplicates,
                golden_record_duplicates: import.golden_record_duplicates,
                persons: members.len(),
                duplicate_in_batch: count(DuplicateStatus::DuplicateInBatch, true),
                duplicate: count(DuplicateStatus::Duplicate, false),
                not_processed: count(DuplicateStatus::NotProcessed, true),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    pool.close().await;
    Ok(())
}
