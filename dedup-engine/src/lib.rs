//! dedup-engine library interface
//!
//! Turns pairwise similarity scores between person records into per-person
//! duplicate classifications and per-import statistics, and drives each
//! import through its deduplication lifecycle.

pub mod db;
pub mod error;
pub mod matcher;
pub mod models;
pub mod services;
pub mod settings;
pub mod tickets;
pub mod utils;

pub use crate::error::{DedupError, DedupResult};
pub use crate::settings::DedupSettings;

use crate::matcher::MatcherClient;
use crate::services::{
    DomainLocks, DuplicateClassifier, LifecycleCoordinator, PopulationScopeResolver,
    SimilarityStore, StatisticsAggregator,
};
use crate::tickets::TicketSink;
use dedup_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Wire the store, classifier and aggregator around one pool and lock registry
pub fn build_aggregator(
    db: &SqlitePool,
    settings: &DedupSettings,
    locks: &DomainLocks,
    event_bus: &EventBus,
) -> (Arc<SimilarityStore>, Arc<StatisticsAggregator>) {
    let store = Arc::new(SimilarityStore::new(db.clone(), settings.max_lock_wait_ms));
    let classifier = DuplicateClassifier::new(PopulationScopeResolver::new(db.clone()), Arc::clone(&store));
    let aggregator = StatisticsAggregator::new(db.clone(), classifier, locks.clone(), settings.clone())
        .with_events(event_bus.clone());
    (store, Arc::new(aggregator))
}

/// Build a fully wired [`LifecycleCoordinator`]
pub fn build_coordinator(
    db: SqlitePool,
    settings: DedupSettings,
    matcher: Arc<dyn MatcherClient>,
    tickets: Arc<dyn TicketSink>,
    event_bus: EventBus,
) -> LifecycleCoordinator {
    let locks = DomainLocks::new();
    let (store, aggregator) = build_aggregator(&db, &settings, &locks, &event_bus);
    LifecycleCoordinator::new(db, matcher, tickets, store, aggregator, locks, event_bus)
}
