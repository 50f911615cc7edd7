//! Deduplication domain persistence

use super::parse_uuid;
use crate::models::{DeduplicationDomain, DomainState, MatcherRef, Score};
use dedup_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

const DOMAIN_COLUMNS: &str =
    "guid, name, matcher_ref, threshold_hundredths, state, error_message";

fn domain_from_row(row: &SqliteRow) -> Result<DeduplicationDomain> {
    let id: String = row.get("guid");
    let threshold: Option<i64> = row.get("threshold_hundredths");
    let threshold = threshold
        .map(|h| {
            Score::from_hundredths(h)
                .ok_or_else(|| Error::InvalidInput(format!("Stored threshold out of range: {}", h)))
        })
        .transpose()?;
    let state: String = row.get("state");

    Ok(DeduplicationDomain {
        id: parse_uuid(&id, "dedup_domains.guid")?,
        name: row.get("name"),
        matcher_ref: row.get::<Option<String>, _>("matcher_ref").map(MatcherRef),
        threshold,
        state: state.parse()?,
        error_message: row.get("error_message"),
    })
}

/// Insert a new domain
pub async fn insert_domain(pool: &SqlitePool, domain: &DeduplicationDomain) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dedup_domains (guid, name, matcher_ref, threshold_hundredths, state, error_message)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(domain.id.to_string())
    .bind(&domain.name)
    .bind(domain.matcher_ref.as_ref().map(|r| r.0.clone()))
    .bind(domain.threshold.map(|t| i64::from(t.hundredths())))
    .bind(domain.state.as_str())
    .bind(&domain.error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a domain by id
pub async fn load_domain(pool: &SqlitePool, domain_id: Uuid) -> Result<Option<DeduplicationDomain>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM dedup_domains WHERE guid = ?",
        DOMAIN_COLUMNS
    ))
    .bind(domain_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(domain_from_row).transpose()
}

/// Load a domain, failing with `NotFound` if it does not exist
pub async fn require_domain(pool: &SqlitePool, domain_id: Uuid) -> Result<DeduplicationDomain> {
    load_domain(pool, domain_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Deduplication domain {}", domain_id)))
}

/// Find the domain holding a matcher reference
pub async fn find_by_matcher_ref(
    pool: &SqlitePool,
    matcher_ref: &MatcherRef,
) -> Result<Option<DeduplicationDomain>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM dedup_domains WHERE matcher_ref = ?",
        DOMAIN_COLUMNS
    ))
    .bind(matcher_ref.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(domain_from_row).transpose()
}

pub async fn domain_exists(pool: &SqlitePool, domain_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dedup_domains WHERE guid = ?)")
        .bind(domain_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(exists)
}

/// Set or clear the matcher reference
pub async fn set_matcher_ref(
    pool: &SqlitePool,
    domain_id: Uuid,
    matcher_ref: Option<&MatcherRef>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE dedup_domains SET matcher_ref = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(matcher_ref.map(|r| r.0.clone()))
    .bind(domain_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Deduplication domain {}", domain_id)));
    }
    Ok(())
}

/// Record domain state; the message is kept only for `error`
pub async fn set_state(
    pool: &SqlitePool,
    domain_id: Uuid,
    state: DomainState,
    message: Option<&str>,
) -> Result<()> {
    let message = if state == DomainState::Error { message } else { None };

    sqlx::query(
        "UPDATE dedup_domains SET state = ?, error_message = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(state.as_str())
    .bind(message)
    .bind(domain_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Configure the domain's threshold (`None` falls back to the runtime default)
pub async fn set_threshold(pool: &SqlitePool, domain_id: Uuid, threshold: Option<Score>) -> Result<()> {
    sqlx::query(
        "UPDATE dedup_domains SET threshold_hundredths = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(threshold.map(|t| i64::from(t.hundredths())))
    .bind(domain_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
