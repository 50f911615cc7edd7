//! Integration tests for statistics recomputation

mod helpers;

use dedup_common::events::{DedupEvent, EventBus};
use dedup_engine::db::{domains, imports, persons};
use dedup_engine::models::{DuplicateStatus, Import, MergeStatus, Score, SimilarityPair};
use dedup_engine::services::DomainLocks;
use dedup_engine::DedupSettings;
use helpers::{aggregator, create_test_db, person, pid, seed_scenario, targets, Scenario};
use sqlx::SqlitePool;

/// Everything a recompute writes, as stored
async fn snapshot(pool: &SqlitePool) -> Vec<(String, String, String, String, String)> {
    sqlx::query_as(
        "SELECT guid, batch_status, population_status, batch_matches, population_matches \
         FROM persons ORDER BY guid",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn counters(pool: &SqlitePool) -> Vec<(String, i64, i64)> {
    sqlx::query_as("SELECT guid, batch_duplicates, golden_record_duplicates FROM imports ORDER BY guid")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_recompute_reference_scenario() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    let stats = aggregator.recompute_for_import(scenario.i1).await.unwrap();

    assert_eq!(stats.batch_duplicates, Some(2));
    assert_eq!(stats.golden_record_duplicates, 2);
    assert_eq!(stats.persons_evaluated, 2);

    let i1 = helpers::import(&pool, scenario.i1).await;
    assert_eq!(i1.batch_duplicates, 2);
    assert_eq!(i1.golden_record_duplicates, 2);

    let p1 = person(&pool, 1).await;
    assert_eq!(p1.batch_status, DuplicateStatus::DuplicateInBatch);
    assert_eq!(targets(&p1.batch_matches), vec![(pid(2), 9000)]);
    assert_eq!(p1.population_status, DuplicateStatus::Duplicate);
    assert_eq!(targets(&p1.population_matches), vec![(pid(5), 8000), (pid(3), 7000)]);
    assert_eq!(p1.population_matches[0].display.full_name, "Person 5");
    assert_eq!(
        p1.population_matches[1].display.registration_ref.as_deref(),
        Some("REG-0003")
    );
    assert!(p1.population_matches[0].target_merged);

    let p2 = person(&pool, 2).await;
    assert_eq!(p2.batch_status, DuplicateStatus::DuplicateInBatch);
    assert_eq!(targets(&p2.batch_matches), vec![(pid(1), 9000)]);
    assert_eq!(targets(&p2.population_matches), vec![(pid(6), 9000)]);

    // Population persons are not touched by an I1 recompute
    let p3 = person(&pool, 3).await;
    assert_eq!(p3.batch_status, DuplicateStatus::NotProcessed);
    assert_eq!(p3.population_status, DuplicateStatus::NotProcessed);
}

#[tokio::test]
async fn test_recompute_is_idempotent() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    aggregator.recompute_for_import(scenario.i1).await.unwrap();
    aggregator
        .recompute_for_domain_excluding(scenario.domain_id, Some(scenario.i1))
        .await
        .unwrap();
    let first = (snapshot(&pool).await, counters(&pool).await);

    aggregator.recompute_for_import(scenario.i1).await.unwrap();
    aggregator
        .recompute_for_domain_excluding(scenario.domain_id, Some(scenario.i1))
        .await
        .unwrap();
    let second = (snapshot(&pool).await, counters(&pool).await);

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_empty_replace_resets_to_unique() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);

    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();
    aggregator.recompute_for_import(scenario.i1).await.unwrap();

    store.replace_pairs(scenario.domain_id, &[]).await.unwrap();
    let stats = aggregator.recompute_for_import(scenario.i1).await.unwrap();

    assert_eq!(stats.batch_duplicates, Some(0));
    assert_eq!(stats.golden_record_duplicates, 0);
    for n in [1, 2] {
        let p = person(&pool, n).await;
        assert_eq!(p.batch_status, DuplicateStatus::Unique);
        assert_eq!(p.population_status, DuplicateStatus::Unique);
        assert!(p.batch_matches.is_empty());
        assert!(p.population_matches.is_empty());
    }
}

#[tokio::test]
async fn test_withdrawn_target_disappears() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();
    aggregator.recompute_for_import(scenario.i1).await.unwrap();

    persons::set_withdrawn(&pool, pid(3), true).await.unwrap();
    aggregator.recompute_for_import(scenario.i1).await.unwrap();

    let p1 = person(&pool, 1).await;
    assert_eq!(targets(&p1.population_matches), vec![(pid(5), 8000)]);
}

#[tokio::test]
async fn test_withdrawn_batch_person_is_reset() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();
    aggregator.recompute_for_import(scenario.i1).await.unwrap();

    persons::set_withdrawn(&pool, pid(2), true).await.unwrap();
    let stats = aggregator.recompute_for_import(scenario.i1).await.unwrap();

    let p2 = person(&pool, 2).await;
    assert_eq!(p2.batch_status, DuplicateStatus::NotProcessed);
    assert_eq!(p2.population_status, DuplicateStatus::NotProcessed);
    assert!(p2.batch_matches.is_empty());
    assert!(p2.population_matches.is_empty());

    let p1 = person(&pool, 1).await;
    assert_eq!(p1.batch_status, DuplicateStatus::Unique);
    assert!(p1.batch_matches.is_empty());

    assert_eq!(stats.batch_duplicates, Some(0));
    assert_eq!(stats.golden_record_duplicates, 1);
}

#[tokio::test]
async fn test_domain_recompute_updates_merged_imports() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    let stats = aggregator
        .recompute_for_domain_excluding(scenario.domain_id, None)
        .await
        .unwrap();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.batch_duplicates.is_none()));

    // Post-merge: P3..P6 compared against every other import, I1 included
    let p3 = person(&pool, 3).await;
    assert_eq!(targets(&p3.population_matches), vec![(pid(1), 7000)]);
    assert_eq!(p3.population_status, DuplicateStatus::Duplicate);
    assert!(!p3.population_matches[0].target_merged);
    let p4 = person(&pool, 4).await;
    assert_eq!(targets(&p4.population_matches), vec![(pid(5), 7000)]);
    let p5 = person(&pool, 5).await;
    assert_eq!(targets(&p5.population_matches), vec![(pid(1), 8000), (pid(4), 7000)]);
    let p6 = person(&pool, 6).await;
    assert_eq!(targets(&p6.population_matches), vec![(pid(2), 9000)]);

    // Batch-internal status of merged imports is left alone
    assert_eq!(p3.batch_status, DuplicateStatus::NotProcessed);
    assert!(p3.batch_matches.is_empty());

    let import_a = helpers::import(&pool, scenario.import_a).await;
    assert_eq!(import_a.golden_record_duplicates, 2);
    assert_eq!(import_a.batch_duplicates, 0);
}

#[tokio::test]
async fn test_domain_recompute_skips_excluded_import() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    let stats = aggregator
        .recompute_for_domain_excluding(scenario.domain_id, Some(scenario.import_a))
        .await
        .unwrap();

    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].import_id, scenario.import_b);
    assert_eq!(person(&pool, 3).await.population_status, DuplicateStatus::NotProcessed);
    assert_eq!(person(&pool, 5).await.population_status, DuplicateStatus::Duplicate);
    // Pending import I1 is never part of a domain recompute
    assert_eq!(person(&pool, 1).await.population_status, DuplicateStatus::NotProcessed);
}

#[tokio::test]
async fn test_recompute_after_merge() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();
    aggregator.recompute_for_import(scenario.i1).await.unwrap();
    let before = person(&pool, 1).await;

    assert_eq!(persons::mark_import_merged(&pool, scenario.i1).await.unwrap(), 2);
    assert_eq!(persons::mark_import_merged(&pool, scenario.i1).await.unwrap(), 0);

    let stats = aggregator.recompute_after_merge(scenario.i1).await.unwrap();
    assert_eq!(stats.golden_record_duplicates, 2);
    assert_eq!(stats.batch_duplicates, None);

    let after = person(&pool, 1).await;
    assert_eq!(after.merge_status, MergeStatus::Merged);
    assert_eq!(after.population_matches, before.population_matches);
    assert_eq!(after.batch_matches, before.batch_matches);
    assert!(helpers::import(&pool, scenario.i1).await.merged);
    assert_eq!(helpers::import(&pool, scenario.i1).await.batch_duplicates, 2);
}

#[tokio::test]
async fn test_merged_import_is_compared_against_later_pending_import() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);

    persons::mark_import_merged(&pool, scenario.i1).await.unwrap();
    let i2 = Import::new(scenario.domain_id, "Round 4");
    imports::insert_import(&pool, &i2).await.unwrap();
    helpers::insert_person(&pool, i2.id, 7, MergeStatus::Pending).await;

    let mut edges = Scenario::edges();
    edges.push(SimilarityPair::found(pid(1), pid(7), Score::whole(95)));
    store.replace_pairs(scenario.domain_id, &edges).await.unwrap();

    aggregator
        .recompute_for_domain_excluding(scenario.domain_id, Some(i2.id))
        .await
        .unwrap();

    // I1 is merged now; P2 is its own import and never a population target
    let p1 = person(&pool, 1).await;
    assert_eq!(
        targets(&p1.population_matches),
        vec![(pid(7), 9500), (pid(5), 8000), (pid(3), 7000)]
    );

    let stats = aggregator.recompute_for_import(i2.id).await.unwrap();
    assert_eq!(stats.golden_record_duplicates, 1);
    assert_eq!(targets(&person(&pool, 7).await.population_matches), vec![(pid(1), 9500)]);
}

#[tokio::test]
async fn test_default_threshold_applies_without_domain_threshold() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    domains::set_threshold(&pool, scenario.domain_id, None).await.unwrap();
    let (store, aggregator) = aggregator(&pool);

    let edges = vec![
        SimilarityPair::found(pid(1), pid(3), Score::whole(50)),
        SimilarityPair::found(pid(2), pid(4), Score::from_hundredths(4999).unwrap()),
    ];
    store.replace_pairs(scenario.domain_id, &edges).await.unwrap();

    let stats = aggregator.recompute_for_import(scenario.i1).await.unwrap();

    assert_eq!(stats.golden_record_duplicates, 1);
    assert_eq!(person(&pool, 2).await.population_status, DuplicateStatus::Unique);
}

#[tokio::test]
async fn test_match_summaries_are_bounded() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let settings = DedupSettings {
        match_summary_limit: 1,
        ..DedupSettings::default()
    };
    let (store, aggregator) =
        dedup_engine::build_aggregator(&pool, &settings, &DomainLocks::new(), &EventBus::new(10));
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    let stats = aggregator.recompute_for_import(scenario.i1).await.unwrap();

    let p1 = person(&pool, 1).await;
    assert_eq!(targets(&p1.population_matches), vec![(pid(5), 8000)]);
    // Counters reflect all matches, not the stored summaries
    assert_eq!(stats.golden_record_duplicates, 2);
}

#[tokio::test]
async fn test_recompute_emits_event() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let events = EventBus::new(10);
    let mut rx = events.subscribe();
    let (store, aggregator) =
        dedup_engine::build_aggregator(&pool, &DedupSettings::default(), &DomainLocks::new(), &events);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    aggregator.recompute_for_import(scenario.i1).await.unwrap();

    match rx.recv().await.unwrap() {
        DedupEvent::StatisticsRecomputed {
            import_id,
            batch_duplicates,
            golden_record_duplicates,
            ..
        } => {
            assert_eq!(import_id, scenario.i1);
            assert_eq!(batch_duplicates, 2);
            assert_eq!(golden_record_duplicates, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_recompute_unknown_import_is_storage_error() {
    let (_dir, pool) = create_test_db().await;
    let (_, aggregator) = aggregator(&pool);

    let err = aggregator
        .recompute_for_import(uuid::Uuid::new_v4())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        dedup_engine::DedupError::Storage(dedup_common::Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_import_without_persons_has_no_duplicates() {
    let (_dir, pool) = create_test_db().await;
    let scenario = seed_scenario(&pool).await;
    let (store, aggregator) = aggregator(&pool);
    store.replace_pairs(scenario.domain_id, &Scenario::edges()).await.unwrap();

    let empty = Import::new(scenario.domain_id, "Empty round");
    imports::insert_import(&pool, &empty).await.unwrap();

    let stats = aggregator.recompute_for_import(empty.id).await.unwrap();

    assert_eq!(stats.persons_evaluated, 0);
    assert_eq!(stats.batch_duplicates, Some(0));
    assert_eq!(stats.golden_record_duplicates, 0);
}
