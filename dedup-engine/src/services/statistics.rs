//! Duplicate statistics
//!
//! Rewrites per-person duplicate status, bounded match summaries and per-import
//! counters from the current edge set. Every write overwrites, so running a
//! recompute twice over unchanged edges stores byte-identical results.

use super::classifier::{DuplicateClassifier, DuplicateSet};
use super::domain_locks::{DomainGuard, DomainLocks};
use super::scope_resolver::PopulationScope;
use crate::db::persons::{ClassificationUpdate, ScopeUpdate};
use crate::db::{domains, imports, persons};
use crate::error::{DedupError, DedupResult};
use crate::models::{DuplicateStatus, Import, MatchSummary, Score};
use crate::settings::DedupSettings;
use crate::tickets::ReviewMatches;
use crate::utils::{begin_monitored, retry_on_lock};
use chrono::Utc;
use dedup_common::events::{DedupEvent, EventBus};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Counters written for one import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStatistics {
    pub import_id: Uuid,
    /// `None` when only the population scope was recomputed
    pub batch_duplicates: Option<u32>,
    pub golden_record_duplicates: u32,
    pub persons_evaluated: usize,
}

/// Statistics plus the duplicate sets they were derived from
#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    pub statistics: ImportStatistics,
    pub matches: ReviewMatches,
}

/// Recomputes duplicate statistics for imports and domains
pub struct StatisticsAggregator {
    db: Pool<Sqlite>,
    classifier: DuplicateClassifier,
    locks: DomainLocks,
    settings: DedupSettings,
    events: Option<EventBus>,
}

impl StatisticsAggregator {
    pub fn new(
        db: Pool<Sqlite>,
        classifier: DuplicateClassifier,
        locks: DomainLocks,
        settings: DedupSettings,
    ) -> Self {
        Self {
            db,
            classifier,
            locks,
            settings,
            events: None,
        }
    }

    /// Broadcast `StatisticsRecomputed` events on `events`
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.settings
    }

    /// Classify an import in both scopes and overwrite its statistics
    ///
    /// **Algorithm:**
    /// 1. Take the domain lock so no edge replacement runs concurrently
    /// 2. Classify the import's batch (scope mode follows the import's merge flag)
    /// 3. For every batch person, overwrite both scope statuses and match lists
    /// 4. Reset withdrawn persons of the import to `not_processed`
    /// 5. Write both counters, all in one transaction
    pub async fn recompute_for_import(&self, import_id: Uuid) -> DedupResult<ImportStatistics> {
        let import = imports::require_import(&self.db, import_id).await?;
        let guard = self.locks.acquire(import.domain_id).await;
        let outcome = self.recompute_for_import_locked(&guard, &import).await?;
        Ok(outcome.statistics)
    }

    /// Re-run population classification for every merged import of a domain
    /// except `import_to_exclude`
    ///
    /// Batch-internal status of those imports is left as it is.
    pub async fn recompute_for_domain_excluding(
        &self,
        domain_id: Uuid,
        import_to_exclude: Option<Uuid>,
    ) -> DedupResult<Vec<ImportStatistics>> {
        let guard = self.locks.acquire(domain_id).await;
        let exclude: BTreeSet<Uuid> = import_to_exclude.into_iter().collect();
        self.recompute_domain_locked(&guard, &exclude).await
    }

    /// Post-merge population classification for a freshly merged import
    pub async fn recompute_after_merge(&self, import_id: Uuid) -> DedupResult<ImportStatistics> {
        let import = imports::require_import(&self.db, import_id).await?;
        let guard = self.locks.acquire(import.domain_id).await;
        let threshold = self.threshold_for(guard.domain_id()).await?;
        self.recompute_population(&import, threshold).await
    }

    pub(crate) async fn recompute_for_import_locked(
        &self,
        guard: &DomainGuard,
        import: &Import,
    ) -> DedupResult<RecomputeOutcome> {
        check_guard(guard, import)?;
        let threshold = self.threshold_for(import.domain_id).await?;
        let classification = self.classifier.classify(import, threshold, import.merged).await?;
        let limit = self.settings.match_summary_limit;

        let batch = scope_updates(&classification.scope, &classification.batch, limit);
        let mut population = scope_updates(&classification.scope, &classification.population, limit);

        let mut updates: Vec<ClassificationUpdate> = batch
            .into_iter()
            .map(|(person_id, batch)| ClassificationUpdate {
                person_id,
                batch: Some(batch),
                population: population.remove(&person_id),
            })
            .collect();

        for person in persons::load_for_import(&self.db, import.id).await? {
            if person.withdrawn {
                updates.push(ClassificationUpdate {
                    person_id: person.id,
                    batch: Some(ScopeUpdate::reset()),
                    population: Some(ScopeUpdate::reset()),
                });
            }
        }

        let statistics = ImportStatistics {
            import_id: import.id,
            batch_duplicates: Some(classification.batch.duplicate_count()),
            golden_record_duplicates: classification.population.duplicate_count(),
            persons_evaluated: classification.scope.batch.len(),
        };

        self.write(import.id, &updates, &statistics).await?;

        Ok(RecomputeOutcome {
            statistics,
            matches: ReviewMatches {
                batch: classification.batch,
                population: classification.population,
            },
        })
    }

    pub(crate) async fn recompute_domain_locked(
        &self,
        guard: &DomainGuard,
        exclude: &BTreeSet<Uuid>,
    ) -> DedupResult<Vec<ImportStatistics>> {
        let domain_id = guard.domain_id();
        let threshold = self.threshold_for(domain_id).await?;

        let mut results = Vec::new();
        for import in imports::list_for_domain(&self.db, domain_id).await? {
            if !import.merged || exclude.contains(&import.id) {
                continue;
            }
            results.push(self.recompute_population(&import, threshold).await?);
        }

        tracing::info!(
            domain_id = %domain_id,
            imports = results.len(),
            excluded = exclude.len(),
            "Recomputed population statistics for merged imports"
        );
        Ok(results)
    }

    /// Forget every classification in the guarded domain
    ///
    /// Persons return to `not_processed` with empty match lists and every
    /// import's counters drop to zero, in one transaction. Used when the
    /// domain's edges are discarded.
    pub(crate) async fn reset_domain_locked(&self, guard: &DomainGuard) -> DedupResult<u64> {
        let domain_id = guard.domain_id();
        let pool = &self.db;

        let reset = retry_on_lock(
            "statistics reset",
            self.settings.max_lock_wait_ms,
            || async move {
                let mut tx = begin_monitored(pool, "statistics::reset_domain").await?;
                let count = persons::reset_domain_classification(tx.inner_mut(), domain_id).await?;
                imports::reset_counters(tx.inner_mut(), domain_id).await?;
                tx.commit().await?;
                Ok(count)
            },
        )
        .await?;

        tracing::info!(domain_id = %domain_id, persons = reset, "Cleared domain classifications");
        Ok(reset)
    }

    async fn recompute_population(
        &self,
        import: &Import,
        threshold: Score,
    ) -> DedupResult<ImportStatistics> {
        let classification = self.classifier.classify(import, threshold, true).await?;
        let limit = self.settings.match_summary_limit;

        let mut updates: Vec<ClassificationUpdate> =
            scope_updates(&classification.scope, &classification.population, limit)
                .into_iter()
                .map(|(person_id, population)| ClassificationUpdate {
                    person_id,
                    batch: None,
                    population: Some(population),
                })
                .collect();

        for person in persons::load_for_import(&self.db, import.id).await? {
            if person.withdrawn {
                updates.push(ClassificationUpdate {
                    person_id: person.id,
                    batch: None,
                    population: Some(ScopeUpdate::reset()),
                });
            }
        }

        let statistics = ImportStatistics {
            import_id: import.id,
            batch_duplicates: None,
            golden_record_duplicates: classification.population.duplicate_count(),
            persons_evaluated: classification.scope.batch.len(),
        };

        self.write(import.id, &updates, &statistics).await?;
        Ok(statistics)
    }

    async fn threshold_for(&self, domain_id: Uuid) -> DedupResult<Score> {
        let domain = domains::require_domain(&self.db, domain_id).await?;
        Ok(domain.effective_threshold(self.settings.default_threshold))
    }

    async fn write(
        &self,
        import_id: Uuid,
        updates: &[ClassificationUpdate],
        statistics: &ImportStatistics,
    ) -> DedupResult<()> {
        let pool = &self.db;
        retry_on_lock(
            "statistics write",
            self.settings.max_lock_wait_ms,
            || async move {
                let mut tx = begin_monitored(pool, "statistics::write").await?;
                persons::apply_classification(tx.inner_mut(), updates).await?;
                imports::update_counters(
                    tx.inner_mut(),
                    import_id,
                    statistics.batch_duplicates,
                    statistics.golden_record_duplicates,
                )
                .await?;
                tx.commit().await
            },
        )
        .await?;

        tracing::info!(
            import_id = %import_id,
            batch_duplicates = ?statistics.batch_duplicates,
            golden_record_duplicates = statistics.golden_record_duplicates,
            persons = statistics.persons_evaluated,
            "Statistics recomputed"
        );

        if let Some(events) = &self.events {
            let stored = imports::require_import(&self.db, import_id).await?;
            events.emit_lossy(DedupEvent::StatisticsRecomputed {
                import_id,
                batch_duplicates: stored.batch_duplicates,
                golden_record_duplicates: stored.golden_record_duplicates,
                timestamp: Utc::now(),
            });
        }

        Ok(())
    }
}

fn check_guard(guard: &DomainGuard, import: &Import) -> DedupResult<()> {
    if guard.domain_id() != import.domain_id {
        return Err(DedupError::InvariantViolation(format!(
            "Import {} recomputed under the lock of domain {}",
            import.id,
            guard.domain_id()
        )));
    }
    Ok(())
}

/// Status and bounded match list for every evaluated person of `set`
fn scope_updates(
    scope: &PopulationScope,
    set: &DuplicateSet,
    limit: usize,
) -> BTreeMap<Uuid, ScopeUpdate> {
    let view = set.per_person();

    set.evaluated()
        .iter()
        .map(|person_id| {
            let list = view.get(person_id).map(Vec::as_slice).unwrap_or(&[]);
            let status = if list.is_empty() {
                DuplicateStatus::Unique
            } else {
                set.matched_status()
            };
            let matches: Vec<MatchSummary> = list
                .iter()
                .take(limit)
                .filter_map(|m| scope.summary_for(m.target_id, m.score))
                .collect();

            (*person_id, ScopeUpdate { status, matches })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DuplicateStatus, MergeStatus, Person, SimilarityPair};
    use crate::services::classifier::classify_edges;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn scope_and_edges() -> (PopulationScope, Vec<SimilarityPair>) {
        let mut persons: Vec<Person> = (1..=5)
            .map(|n| Person::new(id(100), format!("P{}", n)).with_id(id(n)))
            .collect();
        let mut other = Person::new(id(200), "P9").with_id(id(9));
        other.merge_status = MergeStatus::Merged;
        persons.push(other);

        let edges = vec![
            SimilarityPair::found(id(1), id(9), Score::whole(95)),
            SimilarityPair::found(id(1), id(2), Score::whole(90)),
            SimilarityPair::found(id(1), id(3), Score::whole(80)),
            SimilarityPair::found(id(1), id(4), Score::whole(70)),
        ];
        (PopulationScope::compute(id(100), false, &persons), edges)
    }

    #[test]
    fn test_match_lists_are_bounded() {
        let (scope, edges) = scope_and_edges();
        let (batch, _) = classify_edges(&scope, &edges, Score::whole(60));

        let updates = scope_updates(&scope, &batch, 2);
        let p1 = &updates[&id(1)];

        assert_eq!(p1.status, DuplicateStatus::DuplicateInBatch);
        let targets: Vec<Uuid> = p1.matches.iter().map(|m| m.target_id).collect();
        assert_eq!(targets, vec![id(2), id(3)]);
    }

    #[test]
    fn test_every_evaluated_person_gets_an_update() {
        let (scope, edges) = scope_and_edges();
        let (batch, population) = classify_edges(&scope, &edges, Score::whole(60));

        let batch_updates = scope_updates(&scope, &batch, 10);
        let population_updates = scope_updates(&scope, &population, 10);

        assert_eq!(batch_updates.len(), 5);
        assert_eq!(batch_updates[&id(5)].status, DuplicateStatus::Unique);
        assert_eq!(batch_updates[&id(4)].matches[0].target_id, id(1));
        assert_eq!(population_updates[&id(1)].status, DuplicateStatus::Duplicate);
        assert!(population_updates[&id(1)].matches[0].target_merged);
        assert_eq!(population_updates[&id(2)].status, DuplicateStatus::Unique);
    }

    #[test]
    fn test_large_batch_statuses_match_mirrored_view() {
        // Persons 1..=20000; pairs (1,2), (3,4), ... cover the first 15000
        let persons: Vec<Person> = (1..=20_000)
            .map(|n| Person::new(id(100_000), format!("P{}", n)).with_id(id(n)))
            .collect();
        let edges: Vec<SimilarityPair> = (0..7_500u128)
            .map(|k| SimilarityPair::found(id(2 * k + 1), id(2 * k + 2), Score::whole(85)))
            .collect();
        let scope = PopulationScope::compute(id(100_000), false, &persons);
        let (batch, _) = classify_edges(&scope, &edges, Score::whole(60));

        let updates = scope_updates(&scope, &batch, 10);

        assert_eq!(updates.len(), 20_000);
        let duplicates = updates
            .values()
            .filter(|u| u.status == DuplicateStatus::DuplicateInBatch)
            .count();
        assert_eq!(duplicates, 15_000);
        assert_eq!(duplicates as u32, batch.duplicate_count());

        for n in [1, 2, 14_999, 15_000, 15_001, 20_000] {
            assert_eq!(updates[&id(n)].status, batch.status_of(&id(n)), "P{}", n);
        }
        assert_eq!(updates[&id(15_000)].matches[0].target_id, id(14_999));
    }
}
