//! Database schema migrations
//!
//! Versioned migrations tracked in the `schema_version` table. Every migration
//! is idempotent: it checks the current shape of the schema before altering it,
//! so running the full sequence against a freshly created database is a no-op
//! apart from recording the version.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - add a new one instead
//! 2. **Prefer ALTER TABLE** over DROP/CREATE to preserve data
//! 3. **Increment [`CURRENT_SCHEMA_VERSION`]** with every new migration

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if the table has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: add `error_message` to `imports`
///
/// Early databases recorded failures only as a status. The diagnostic message
/// must be exposed for imports stuck in `error`/`upload_error`.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('imports') WHERE name = 'error_message'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        return Ok(());
    }

    sqlx::query("ALTER TABLE imports ADD COLUMN error_message TEXT")
        .execute(pool)
        .await?;

    info!("  Added error_message column to imports table");
    Ok(())
}

/// Migration v2: one stored edge per canonical unordered pair within a domain
///
/// No-match markers have a NULL second endpoint; COALESCE keeps them unique
/// per first endpoint as well.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS ux_similarity_pair
        ON similarity_pairs(domain_id, first_id, COALESCE(second_id, ''))
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
