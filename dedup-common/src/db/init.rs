//! Database initialization
//!
//! Creates the SQLite database on first run, applies connection pragmas,
//! creates every table the deduplication engine reads or writes, then runs
//! the versioned migrations and seeds default settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets classifier reads proceed while a single writer replaces edges
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    // Idempotent - safe to call multiple times
    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_dedup_domains_table(&pool).await?;
    create_imports_table(&pool).await?;
    create_persons_table(&pool).await?;
    create_similarity_pairs_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per program. `matcher_ref` is NULL until the external domain exists.
async fn create_dedup_domains_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dedup_domains (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            matcher_ref TEXT,
            threshold_hundredths INTEGER
                CHECK (threshold_hundredths IS NULL OR threshold_hundredths BETWEEN 0 AND 10000),
            state TEXT NOT NULL DEFAULT 'clean',
            error_message TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_imports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imports (
            guid TEXT PRIMARY KEY,
            domain_id TEXT NOT NULL REFERENCES dedup_domains(guid) ON DELETE CASCADE,
            name TEXT NOT NULL,
            dedup_status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            batch_duplicates INTEGER NOT NULL DEFAULT 0,
            golden_record_duplicates INTEGER NOT NULL DEFAULT 0,
            run_id INTEGER NOT NULL DEFAULT 0,
            tickets_run_id INTEGER,
            merged INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_imports_domain ON imports(domain_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Match lists are stored as JSON arrays of match summaries
async fn create_persons_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS persons (
            guid TEXT PRIMARY KEY,
            import_id TEXT NOT NULL REFERENCES imports(guid) ON DELETE CASCADE,
            full_name TEXT NOT NULL,
            registration_ref TEXT,
            image_ref TEXT,
            merge_status TEXT NOT NULL DEFAULT 'pending',
            withdrawn INTEGER NOT NULL DEFAULT 0,
            batch_status TEXT NOT NULL DEFAULT 'not_processed',
            population_status TEXT NOT NULL DEFAULT 'not_processed',
            batch_matches TEXT NOT NULL DEFAULT '[]',
            population_matches TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_persons_import ON persons(import_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Edges are indexed by both endpoints so `edges_touching` stays cheap at
/// tens of thousands of rows. `second_id` is NULL for no-match markers.
async fn create_similarity_pairs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS similarity_pairs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain_id TEXT NOT NULL REFERENCES dedup_domains(guid) ON DELETE CASCADE,
            first_id TEXT NOT NULL,
            second_id TEXT,
            score_hundredths INTEGER NOT NULL CHECK (score_hundredths BETWEEN 0 AND 10000),
            status_code INTEGER NOT NULL,
            CHECK (second_id IS NULL OR first_id <= second_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_similarity_first ON similarity_pairs(domain_id, first_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_similarity_second ON similarity_pairs(domain_id, second_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed runtime settings with built-in defaults (never overwrites)
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "dedup_default_threshold", "50.00").await?;
    ensure_setting(pool, "dedup_match_summary_limit", "10").await?;
    ensure_setting(pool, "dedup_database_max_lock_wait_ms", "5000").await?;

    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    Ok(())
}
