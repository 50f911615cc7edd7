//! Person persistence
//!
//! The engine owns only the duplicate-status fields of a person. Match
//! summaries are stored as JSON arrays in `batch_matches`/`population_matches`.

use super::parse_uuid;
use crate::models::{DuplicateStatus, MatchSummary, Person};
use crate::utils::begin_monitored;
use dedup_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

const PERSON_COLUMNS: &str = "p.guid, p.import_id, p.full_name, p.registration_ref, p.image_ref, \
     p.merge_status, p.withdrawn, p.batch_status, p.population_status, \
     p.batch_matches, p.population_matches";

/// New classification for one scope of one person
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeUpdate {
    pub status: DuplicateStatus,
    pub matches: Vec<MatchSummary>,
}

impl ScopeUpdate {
    pub fn reset() -> Self {
        Self {
            status: DuplicateStatus::NotProcessed,
            matches: Vec::new(),
        }
    }
}

/// Classification write for one person; `None` leaves that scope untouched
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationUpdate {
    pub person_id: Uuid,
    pub batch: Option<ScopeUpdate>,
    pub population: Option<ScopeUpdate>,
}

fn decode_matches(raw: &str, column: &str) -> Result<Vec<MatchSummary>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Invalid match list in {}: {}", column, e)))
}

fn encode_matches(matches: &[MatchSummary]) -> Result<String> {
    serde_json::to_string(matches)
        .map_err(|e| Error::Internal(format!("Failed to encode match list: {}", e)))
}

fn person_from_row(row: &SqliteRow) -> Result<Person> {
    let id: String = row.get("guid");
    let import_id: String = row.get("import_id");
    let merge_status: String = row.get("merge_status");
    let batch_status: String = row.get("batch_status");
    let population_status: String = row.get("population_status");
    let batch_matches: String = row.get("batch_matches");
    let population_matches: String = row.get("population_matches");

    Ok(Person {
        id: parse_uuid(&id, "persons.guid")?,
        import_id: parse_uuid(&import_id, "persons.import_id")?,
        full_name: row.get("full_name"),
        registration_ref: row.get("registration_ref"),
        image_ref: row.get("image_ref"),
        merge_status: merge_status.parse()?,
        withdrawn: row.get::<i64, _>("withdrawn") != 0,
        batch_status: batch_status.parse()?,
        population_status: population_status.parse()?,
        batch_matches: decode_matches(&batch_matches, "persons.batch_matches")?,
        population_matches: decode_matches(&population_matches, "persons.population_matches")?,
    })
}

/// Insert a new person
pub async fn insert_person(pool: &SqlitePool, person: &Person) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO persons (
            guid, import_id, full_name, registration_ref, image_ref, merge_status, withdrawn,
            batch_status, population_status, batch_matches, population_matches
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(person.id.to_string())
    .bind(person.import_id.to_string())
    .bind(&person.full_name)
    .bind(&person.registration_ref)
    .bind(&person.image_ref)
    .bind(person.merge_status.as_str())
    .bind(person.withdrawn)
    .bind(person.batch_status.as_str())
    .bind(person.population_status.as_str())
    .bind(encode_matches(&person.batch_matches)?)
    .bind(encode_matches(&person.population_matches)?)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a person by id
pub async fn load_person(pool: &SqlitePool, person_id: Uuid) -> Result<Option<Person>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM persons p WHERE p.guid = ?",
        PERSON_COLUMNS
    ))
    .bind(person_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(person_from_row).transpose()
}

/// All persons of an import, ordered by id
pub async fn load_for_import(pool: &SqlitePool, import_id: Uuid) -> Result<Vec<Person>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM persons p WHERE p.import_id = ? ORDER BY p.guid",
        PERSON_COLUMNS
    ))
    .bind(import_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(person_from_row).collect()
}

/// Every person in every import of a domain, ordered by id
///
/// Accepts a pool or an open connection, so the load can share a read
/// transaction with the edge lookups of the same classification.
pub async fn load_domain_members<'e, E>(executor: E, domain_id: Uuid) -> Result<Vec<Person>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}
        FROM persons p
        JOIN imports i ON i.guid = p.import_id
        WHERE i.domain_id = ?
        ORDER BY p.guid
        "#,
        PERSON_COLUMNS
    ))
    .bind(domain_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(person_from_row).collect()
}

/// Overwrite duplicate status and match lists inside an open transaction
pub async fn apply_classification(
    tx: &mut Transaction<'_, Sqlite>,
    updates: &[ClassificationUpdate],
) -> Result<()> {
    for update in updates {
        if let Some(batch) = &update.batch {
            sqlx::query(
                r#"
                UPDATE persons
                SET batch_status = ?, batch_matches = ?, updated_at = CURRENT_TIMESTAMP
                WHERE guid = ?
                "#,
            )
            .bind(batch.status.as_str())
            .bind(encode_matches(&batch.matches)?)
            .bind(update.person_id.to_string())
            .execute(&mut **tx)
            .await?;
        }

        if let Some(population) = &update.population {
            sqlx::query(
                r#"
                UPDATE persons
                SET population_status = ?, population_matches = ?, updated_at = CURRENT_TIMESTAMP
                WHERE guid = ?
                "#,
            )
            .bind(population.status.as_str())
            .bind(encode_matches(&population.matches)?)
            .bind(update.person_id.to_string())
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Reset every person of a domain to `not_processed` with empty match lists
///
/// Returns the number of persons reset.
pub async fn reset_domain_classification(
    tx: &mut Transaction<'_, Sqlite>,
    domain_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE persons
        SET batch_status = ?, population_status = ?,
            batch_matches = '[]', population_matches = '[]',
            updated_at = CURRENT_TIMESTAMP
        WHERE import_id IN (SELECT guid FROM imports WHERE domain_id = ?)
        "#,
    )
    .bind(DuplicateStatus::NotProcessed.as_str())
    .bind(DuplicateStatus::NotProcessed.as_str())
    .bind(domain_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Set or clear the withdrawn flag
pub async fn set_withdrawn(pool: &SqlitePool, person_id: Uuid, withdrawn: bool) -> Result<()> {
    let result = sqlx::query(
        "UPDATE persons SET withdrawn = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(withdrawn)
    .bind(person_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Person {}", person_id)));
    }
    Ok(())
}

/// Finalize an import: every pending person becomes `merged`
///
/// Persons already merged are left alone, so a repeated call changes nothing.
/// Returns the number of persons transitioned.
pub async fn mark_import_merged(pool: &SqlitePool, import_id: Uuid) -> Result<u64> {
    let mut tx = begin_monitored(pool, "persons::mark_import_merged").await?;

    let result = sqlx::query(
        r#"
        UPDATE persons
        SET merge_status = 'merged', updated_at = CURRENT_TIMESTAMP
        WHERE import_id = ? AND merge_status = 'pending'
        "#,
    )
    .bind(import_id.to_string())
    .execute(&mut **tx.inner_mut())
    .await?;

    let flagged = sqlx::query(
        "UPDATE imports SET merged = 1, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(import_id.to_string())
    .execute(&mut **tx.inner_mut())
    .await?;

    if flagged.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(Error::NotFound(format!("Import {}", import_id)));
    }

    tx.commit().await?;

    tracing::info!(
        import_id = %import_id,
        persons = result.rows_affected(),
        "Import merged into population"
    );

    Ok(result.rows_affected())
}
