//! Test Helper Utilities
//!
//! Shared fixtures for dedup-engine integration tests: a temporary database,
//! the reference six-person scenario, and fake matcher/ticket collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use dedup_common::events::EventBus;
use dedup_engine::db::{domains, imports, persons};
use dedup_engine::matcher::{
    MatcherClient, MatcherError, RawSimilarity, SubmissionEntry, SubmitOutcome,
};
use dedup_engine::models::{
    DedupStatus, DeduplicationDomain, Import, MatcherRef, MergeStatus, Person, Score,
    SimilarityPair,
};
use dedup_engine::services::{DomainLocks, LifecycleCoordinator, SimilarityStore, StatisticsAggregator};
use dedup_engine::tickets::{ReviewMatches, TicketError, TicketSink};
use dedup_engine::DedupSettings;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

/// Create temporary test database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = dedup_common::db::init_database(&temp_dir.path().join("dedup_test.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Deterministic person id; `pid(1) < pid(2) < ...`
pub fn pid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Reference scenario
///
/// Import I1 = {P1, P2} pending. P3, P4 merged through import A; P5, P6
/// merged through import B. Threshold 60.
pub struct Scenario {
    pub domain_id: Uuid,
    pub i1: Uuid,
    pub import_a: Uuid,
    pub import_b: Uuid,
}

impl Scenario {
    pub const EDGES: [(u128, u128, u8); 7] = [
        (1, 2, 90),
        (1, 3, 70),
        (1, 5, 80),
        (2, 6, 90),
        (3, 4, 90),
        (4, 5, 70),
        (5, 6, 80),
    ];

    pub fn edges() -> Vec<SimilarityPair> {
        Self::EDGES
            .iter()
            .map(|&(a, b, s)| SimilarityPair::found(pid(a), pid(b), Score::whole(s)))
            .collect()
    }

    pub fn raw_results() -> Vec<RawSimilarity> {
        Self::EDGES
            .iter()
            .map(|&(a, b, s)| RawSimilarity {
                score: f64::from(s),
                first: Some(pid(b)),
                second: Some(pid(a)),
                status_code: 200,
            })
            .collect()
    }
}

/// Seed the reference scenario (no edges stored yet)
pub async fn seed_scenario(pool: &SqlitePool) -> Scenario {
    let domain = DeduplicationDomain::new("Program X").with_threshold(Score::whole(60));
    domains::insert_domain(pool, &domain).await.unwrap();

    let import_a = insert_merged_import(pool, domain.id, "Prior round A", &[3, 4]).await;
    let import_b = insert_merged_import(pool, domain.id, "Prior round B", &[5, 6]).await;

    let i1 = Import::new(domain.id, "Round 3");
    imports::insert_import(pool, &i1).await.unwrap();
    for n in [1, 2] {
        insert_person(pool, i1.id, n, MergeStatus::Pending).await;
    }

    Scenario {
        domain_id: domain.id,
        i1: i1.id,
        import_a,
        import_b,
    }
}

async fn insert_merged_import(pool: &SqlitePool, domain_id: Uuid, name: &str, members: &[u128]) -> Uuid {
    let mut import = Import::new(domain_id, name);
    import.status = DedupStatus::Finished;
    import.run_id = 1;
    import.tickets_run_id = Some(1);
    import.merged = true;
    imports::insert_import(pool, &import).await.unwrap();

    for &n in members {
        insert_person(pool, import.id, n, MergeStatus::Merged).await;
    }
    import.id
}

pub async fn insert_person(pool: &SqlitePool, import_id: Uuid, n: u128, merge_status: MergeStatus) {
    let mut person = Person::new(import_id, format!("Person {}", n))
        .with_id(pid(n))
        .with_image(format!("images/{}.jpg", n))
        .with_registration_ref(format!("REG-{:04}", n));
    person.merge_status = merge_status;
    persons::insert_person(pool, &person).await.unwrap();
}

pub async fn person(pool: &SqlitePool, n: u128) -> Person {
    persons::load_person(pool, pid(n)).await.unwrap().unwrap()
}

pub async fn import(pool: &SqlitePool, import_id: Uuid) -> Import {
    imports::require_import(pool, import_id).await.unwrap()
}

/// Store and aggregator wired against `pool`
pub fn aggregator(pool: &SqlitePool) -> (Arc<SimilarityStore>, Arc<StatisticsAggregator>) {
    dedup_engine::build_aggregator(
        pool,
        &DedupSettings::default(),
        &DomainLocks::new(),
        &EventBus::new(100),
    )
}

/// Coordinator with fake collaborators
pub fn coordinator(
    pool: &SqlitePool,
    matcher: Arc<FakeMatcher>,
    tickets: Arc<RecordingTickets>,
) -> LifecycleCoordinator {
    dedup_engine::build_coordinator(
        pool.clone(),
        DedupSettings::default(),
        matcher,
        tickets,
        EventBus::new(100),
    )
}

/// Target ids of a person's stored match list
pub fn targets(summaries: &[dedup_engine::models::MatchSummary]) -> Vec<(Uuid, u16)> {
    summaries
        .iter()
        .map(|m| (m.target_id, m.score.hundredths()))
        .collect()
}

/// In-memory stand-in for the external matcher
#[derive(Default)]
pub struct FakeMatcher {
    created: AtomicU32,
    pub deleted: Mutex<Vec<MatcherRef>>,
    pub submissions: Mutex<Vec<(MatcherRef, Vec<SubmissionEntry>)>>,
    pub results: Mutex<Vec<RawSimilarity>>,
    pub reject_with: Mutex<Option<String>>,
    pub unreachable: AtomicBool,
    pub fetch_fails: AtomicBool,
}

impl FakeMatcher {
    pub fn with_results(results: Vec<RawSimilarity>) -> Arc<Self> {
        let matcher = Self::default();
        *matcher.results.lock().unwrap() = results;
        Arc::new(matcher)
    }

    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatcherClient for FakeMatcher {
    async fn create_domain(&self) -> Result<MatcherRef, MatcherError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MatcherRef(format!("matcher-domain-{}", n)))
    }

    async fn submit(
        &self,
        domain: &MatcherRef,
        entries: &[SubmissionEntry],
    ) -> Result<SubmitOutcome, MatcherError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MatcherError::Unreachable("connection refused".to_string()));
        }
        if let Some(reason) = self.reject_with.lock().unwrap().clone() {
            return Ok(SubmitOutcome::Rejected { reason });
        }
        self.submissions
            .lock()
            .unwrap()
            .push((domain.clone(), entries.to_vec()));
        Ok(SubmitOutcome::Accepted)
    }

    async fn fetch_results(&self, _domain: &MatcherRef) -> Result<Vec<RawSimilarity>, MatcherError> {
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(MatcherError::RateLimited);
        }
        Ok(self.results.lock().unwrap().clone())
    }

    async fn delete_domain(&self, domain: &MatcherRef) -> Result<(), MatcherError> {
        self.deleted.lock().unwrap().push(domain.clone());
        Ok(())
    }
}

/// One recorded ticket hand-off
#[derive(Debug, Clone)]
pub struct TicketCall {
    pub import_id: Uuid,
    pub run_id: i64,
    pub matches: ReviewMatches,
}

/// Ticket collaborator that records calls and can be told to fail
#[derive(Default)]
pub struct RecordingTickets {
    pub calls: Mutex<Vec<TicketCall>>,
    pub fail: AtomicBool,
}

impl RecordingTickets {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TicketSink for RecordingTickets {
    async fn create_review_tickets(
        &self,
        import: &Import,
        matches: &ReviewMatches,
    ) -> Result<(), TicketError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TicketError("ticket service unavailable".to_string()));
        }
        self.calls.lock().unwrap().push(TicketCall {
            import_id: import.id,
            run_id: import.run_id,
            matches: matches.clone(),
        });
        Ok(())
    }
}
