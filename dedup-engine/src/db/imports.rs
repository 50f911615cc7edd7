//! Import persistence
//!
//! Status changes are written compare-and-set on the previous status, so two
//! workers can never both apply the same transition.

use super::parse_uuid;
use crate::models::{DedupStatus, Import, StatusTransition};
use dedup_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

const IMPORT_COLUMNS: &str = "guid, domain_id, name, dedup_status, error_message, \
     batch_duplicates, golden_record_duplicates, run_id, tickets_run_id, merged";

fn import_from_row(row: &SqliteRow) -> Result<Import> {
    let id: String = row.get("guid");
    let domain_id: String = row.get("domain_id");
    let status: String = row.get("dedup_status");

    Ok(Import {
        id: parse_uuid(&id, "imports.guid")?,
        domain_id: parse_uuid(&domain_id, "imports.domain_id")?,
        name: row.get("name"),
        status: status.parse()?,
        error_message: row.get("error_message"),
        batch_duplicates: row.get::<i64, _>("batch_duplicates") as u32,
        golden_record_duplicates: row.get::<i64, _>("golden_record_duplicates") as u32,
        run_id: row.get("run_id"),
        tickets_run_id: row.get("tickets_run_id"),
        merged: row.get::<i64, _>("merged") != 0,
    })
}

/// Insert a new import
pub async fn insert_import(pool: &SqlitePool, import: &Import) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO imports (
            guid, domain_id, name, dedup_status, error_message,
            batch_duplicates, golden_record_duplicates, run_id, tickets_run_id, merged
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(import.id.to_string())
    .bind(import.domain_id.to_string())
    .bind(&import.name)
    .bind(import.status.as_str())
    .bind(&import.error_message)
    .bind(i64::from(import.batch_duplicates))
    .bind(i64::from(import.golden_record_duplicates))
    .bind(import.run_id)
    .bind(import.tickets_run_id)
    .bind(import.merged)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load an import by id
pub async fn load_import(pool: &SqlitePool, import_id: Uuid) -> Result<Option<Import>> {
    let row = sqlx::query(&format!("SELECT {} FROM imports WHERE guid = ?", IMPORT_COLUMNS))
        .bind(import_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(import_from_row).transpose()
}

/// Load an import, failing with `NotFound` if it does not exist
pub async fn require_import(pool: &SqlitePool, import_id: Uuid) -> Result<Import> {
    load_import(pool, import_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Import {}", import_id)))
}

/// All imports of a domain, oldest first
pub async fn list_for_domain(pool: &SqlitePool, domain_id: Uuid) -> Result<Vec<Import>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM imports WHERE domain_id = ? ORDER BY created_at, guid",
        IMPORT_COLUMNS
    ))
    .bind(domain_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(import_from_row).collect()
}

/// Imports of a domain currently in one of `statuses`
pub async fn list_by_status(
    pool: &SqlitePool,
    domain_id: Uuid,
    statuses: &[DedupStatus],
) -> Result<Vec<Import>> {
    Ok(list_for_domain(pool, domain_id)
        .await?
        .into_iter()
        .filter(|import| statuses.contains(&import.status))
        .collect())
}

/// Persist a transition already applied to `import`
///
/// Returns `false` when the stored status no longer equals
/// `transition.old_status` (another worker got there first).
pub async fn save_transition(
    pool: &SqlitePool,
    import: &Import,
    transition: &StatusTransition,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE imports
        SET dedup_status = ?, error_message = ?, run_id = ?, updated_at = CURRENT_TIMESTAMP
        WHERE guid = ? AND dedup_status = ?
        "#,
    )
    .bind(transition.new_status.as_str())
    .bind(&import.error_message)
    .bind(import.run_id)
    .bind(import.id.to_string())
    .bind(transition.old_status.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Overwrite the import's duplicate counters
pub async fn update_counters(
    tx: &mut Transaction<'_, Sqlite>,
    import_id: Uuid,
    batch_duplicates: Option<u32>,
    golden_record_duplicates: u32,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE imports
        SET batch_duplicates = COALESCE(?, batch_duplicates),
            golden_record_duplicates = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(batch_duplicates.map(i64::from))
    .bind(i64::from(golden_record_duplicates))
    .bind(import_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Zero both duplicate counters of every import in a domain
pub async fn reset_counters(tx: &mut Transaction<'_, Sqlite>, domain_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE imports
        SET batch_duplicates = 0, golden_record_duplicates = 0, updated_at = CURRENT_TIMESTAMP
        WHERE domain_id = ?
        "#,
    )
    .bind(domain_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Record that review tickets were created for `run_id`
pub async fn mark_tickets_created(pool: &SqlitePool, import_id: Uuid, run_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE imports SET tickets_run_id = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(run_id)
    .bind(import_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
