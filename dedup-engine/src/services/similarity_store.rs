//! Similarity edge storage
//!
//! Persists the scored person-to-person edges of a deduplication domain.
//! Edges are canonical (lower id first) and unique per unordered pair; a new
//! result set always replaces the previous one in a single transaction, so
//! readers see either the old edges or the new ones, never a mix.

use crate::db::{domains, parse_optional_uuid, parse_uuid, persons};
use crate::error::{DedupError, DedupResult};
use crate::matcher::RawSimilarity;
use crate::models::{PairKey, Score, SimilarityPair, SimilarityStatus};
use crate::utils::{begin_monitored, retry_on_lock, MonitoredTransaction};
use dedup_common::Error;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Pool, QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

/// Rows per multi-row INSERT (5 bound parameters each)
const INSERT_CHUNK: usize = 500;

/// Person ids per `IN (...)` list when fetching edges
const LOOKUP_CHUNK: usize = 400;

/// Outcome of canonicalizing and storing one matcher result set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Raw results received from the matcher
    pub received: usize,
    /// Edges written, including no-match markers
    pub stored: usize,
    /// Stored edges with no second endpoint
    pub no_match_markers: usize,
    /// Results with neither endpoint set
    pub dropped_missing_endpoints: usize,
    /// Results naming a person outside the domain
    pub dropped_unknown_person: usize,
    /// Repeated pairs collapsed into their highest-scoring edge
    pub collapsed_duplicates: usize,
}

/// Similarity edge store for all domains
pub struct SimilarityStore {
    db: Pool<Sqlite>,
    max_lock_wait_ms: u64,
}

impl SimilarityStore {
    pub fn new(db: Pool<Sqlite>, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            max_lock_wait_ms,
        }
    }

    /// Atomically replace every edge of `domain_id` with `pairs`
    ///
    /// **Algorithm:**
    /// 1. Fail with a storage error if the domain does not exist
    /// 2. Reject a set holding the same canonical pair twice (invariant violation)
    /// 3. In one transaction: delete the domain's edges, insert the new ones
    ///
    /// An empty `pairs` clears the domain. Returns the number of stored edges.
    pub async fn replace_pairs(&self, domain_id: Uuid, pairs: &[SimilarityPair]) -> DedupResult<usize> {
        if !domains::domain_exists(&self.db, domain_id).await? {
            return Err(DedupError::Storage(Error::NotFound(format!(
                "Deduplication domain {}",
                domain_id
            ))));
        }

        let mut seen: HashSet<PairKey> = HashSet::with_capacity(pairs.len());
        for pair in pairs {
            if !seen.insert(pair.key()) {
                return Err(DedupError::InvariantViolation(format!(
                    "Duplicate edge ({}, {:?}) in replacement set for domain {}",
                    pair.first(),
                    pair.second(),
                    domain_id
                )));
            }
        }

        let pool = &self.db;
        retry_on_lock(
            "similarity store replace",
            self.max_lock_wait_ms,
            || async move {
                let mut tx = begin_monitored(pool, "similarity_store::replace_pairs").await?;

                sqlx::query("DELETE FROM similarity_pairs WHERE domain_id = ?")
                    .bind(domain_id.to_string())
                    .execute(&mut **tx.inner_mut())
                    .await?;

                for chunk in pairs.chunks(INSERT_CHUNK) {
                    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                        "INSERT INTO similarity_pairs (domain_id, first_id, second_id, score_hundredths, status_code) ",
                    );
                    builder.push_values(chunk, |mut b, pair| {
                        b.push_bind(domain_id.to_string())
                            .push_bind(pair.first().to_string())
                            .push_bind(pair.second().map(|s| s.to_string()))
                            .push_bind(i64::from(pair.score().hundredths()))
                            .push_bind(i64::from(pair.status().code()));
                    });
                    builder.build().execute(&mut **tx.inner_mut()).await?;
                }

                tx.commit().await?;
                Ok(())
            },
        )
        .await?;

        tracing::debug!(domain_id = %domain_id, edges = pairs.len(), "Replaced similarity edges");
        Ok(pairs.len())
    }

    /// Open a read transaction
    ///
    /// Every query issued through it sees the same committed edge set, even
    /// when another process replaces the domain's edges in between.
    pub async fn begin_snapshot(&self, caller: &'static str) -> DedupResult<MonitoredTransaction<'_>> {
        Ok(begin_monitored(&self.db, caller).await?)
    }

    /// All edges of `domain_id` with at least one endpoint in `person_ids`
    ///
    /// Sorted by canonical pair. No-match markers are included.
    pub async fn edges_touching(
        &self,
        domain_id: Uuid,
        person_ids: &BTreeSet<Uuid>,
    ) -> DedupResult<Vec<SimilarityPair>> {
        let mut snapshot = self.begin_snapshot("similarity_store::edges_touching").await?;
        let edges = self
            .edges_touching_in(&mut **snapshot.inner_mut(), domain_id, person_ids)
            .await?;
        snapshot.commit().await?;
        Ok(edges)
    }

    /// [`Self::edges_touching`] on `conn`
    ///
    /// Large id sets are fetched in several statements; run them inside one
    /// transaction to keep them on a single snapshot.
    pub async fn edges_touching_in(
        &self,
        conn: &mut SqliteConnection,
        domain_id: Uuid,
        person_ids: &BTreeSet<Uuid>,
    ) -> DedupResult<Vec<SimilarityPair>> {
        let ids: Vec<Uuid> = person_ids.iter().copied().collect();
        let mut by_row: BTreeMap<i64, SimilarityPair> = BTreeMap::new();

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, first_id, second_id, score_hundredths, status_code \
                 FROM similarity_pairs WHERE domain_id = ",
            );
            builder.push_bind(domain_id.to_string());
            builder.push(" AND (first_id IN (");
            push_id_list(&mut builder, chunk);
            builder.push(") OR second_id IN (");
            push_id_list(&mut builder, chunk);
            builder.push("))");

            let rows = builder.build().fetch_all(&mut *conn).await?;
            for row in &rows {
                let row_id: i64 = row.get("id");
                if !by_row.contains_key(&row_id) {
                    by_row.insert(row_id, pair_from_row(row)?);
                }
            }
        }

        let mut edges: Vec<SimilarityPair> = by_row.into_values().collect();
        edges.sort_by_key(|pair| pair.key());

        tracing::trace!(
            domain_id = %domain_id,
            persons = person_ids.len(),
            edges = edges.len(),
            "Fetched edges"
        );
        Ok(edges)
    }

    /// No-match markers of a domain, kept for audit
    pub async fn no_match_markers(&self, domain_id: Uuid) -> DedupResult<Vec<SimilarityPair>> {
        let rows = sqlx::query(
            r#"
            SELECT id, first_id, second_id, score_hundredths, status_code
            FROM similarity_pairs
            WHERE domain_id = ? AND second_id IS NULL
            ORDER BY first_id
            "#,
        )
        .bind(domain_id.to_string())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(pair_from_row).collect()
    }

    /// Number of stored edges for a domain
    pub async fn count_pairs(&self, domain_id: Uuid) -> DedupResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM similarity_pairs WHERE domain_id = ?")
            .bind(domain_id.to_string())
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }

    /// Canonicalize a raw matcher result set and store it as the domain's edges
    pub async fn ingest_results(
        &self,
        domain_id: Uuid,
        results: &[RawSimilarity],
    ) -> DedupResult<IngestReport> {
        let known: HashSet<Uuid> = persons::load_domain_members(&self.db, domain_id)
            .await?
            .into_iter()
            .map(|person| person.id)
            .collect();

        let (pairs, mut report) = canonicalize_results(domain_id, results, &known)?;
        report.stored = self.replace_pairs(domain_id, &pairs).await?;

        tracing::info!(
            domain_id = %domain_id,
            received = report.received,
            stored = report.stored,
            no_match_markers = report.no_match_markers,
            dropped = report.dropped_missing_endpoints + report.dropped_unknown_person,
            "Ingested matcher results"
        );
        Ok(report)
    }
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[Uuid]) {
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
}

fn pair_from_row(row: &SqliteRow) -> DedupResult<SimilarityPair> {
    let first: String = row.get("first_id");
    let second: Option<String> = row.get("second_id");
    let hundredths: i64 = row.get("score_hundredths");
    let code: i64 = row.get("status_code");

    let score = Score::from_hundredths(hundredths).ok_or_else(|| {
        DedupError::InvariantViolation(format!("Stored score out of range: {}", hundredths))
    })?;
    let code = u16::try_from(code).map_err(|_| {
        DedupError::InvariantViolation(format!("Stored status code out of range: {}", code))
    })?;

    SimilarityPair::from_stored(
        parse_uuid(&first, "similarity_pairs.first_id")?,
        parse_optional_uuid(second, "similarity_pairs.second_id")?,
        score,
        SimilarityStatus::from_code(code),
    )
}

/// Turn raw matcher triples into canonical, unique edges
///
/// Noisy results are dropped with a warning and counted; a score outside
/// `0..=100` is an invariant violation. Output is ordered by canonical pair.
pub fn canonicalize_results(
    domain_id: Uuid,
    results: &[RawSimilarity],
    known: &HashSet<Uuid>,
) -> DedupResult<(Vec<SimilarityPair>, IngestReport)> {
    let mut report = IngestReport {
        received: results.len(),
        ..IngestReport::default()
    };
    let mut pairs: BTreeMap<PairKey, SimilarityPair> = BTreeMap::new();

    for raw in results {
        let score = Score::from_percent(raw.score).ok_or_else(|| {
            DedupError::InvariantViolation(format!(
                "Matcher score out of range for domain {}: {}",
                domain_id, raw.score
            ))
        })?;

        let (a, b) = match (raw.first, raw.second) {
            (Some(a), b) => (a, b),
            (None, Some(b)) => (b, None),
            (None, None) => {
                tracing::warn!(
                    domain_id = %domain_id,
                    status_code = raw.status_code,
                    "Dropping matcher result with no person ids"
                );
                report.dropped_missing_endpoints += 1;
                continue;
            }
        };

        if let Some(unknown) = std::iter::once(a).chain(b).find(|id| !known.contains(id)) {
            tracing::warn!(
                domain_id = %domain_id,
                person_id = %unknown,
                "Dropping matcher result for person outside the domain"
            );
            report.dropped_unknown_person += 1;
            continue;
        }

        let pair = SimilarityPair::new(a, b, score, SimilarityStatus::from_code(raw.status_code));
        match pairs.get(&pair.key()) {
            Some(existing) => {
                tracing::warn!(
                    domain_id = %domain_id,
                    first = %pair.first(),
                    kept_score = %existing.score().max(pair.score()),
                    "Matcher returned the same pair twice, keeping the higher score"
                );
                report.collapsed_duplicates += 1;
                if pair.score() > existing.score() {
                    pairs.insert(pair.key(), pair);
                }
            }
            None => {
                pairs.insert(pair.key(), pair);
            }
        }
    }

    let pairs: Vec<SimilarityPair> = pairs.into_values().collect();
    report.no_match_markers = pairs.iter().filter(|p| p.is_no_match_marker()).count();
    Ok((pairs, report))
}
