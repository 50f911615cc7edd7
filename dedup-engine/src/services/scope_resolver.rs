//! Population scope resolution
//!
//! Splits a domain's persons, relative to one target import, into:
//! - **batch**: the import's own persons still under evaluation
//! - **population**: finalized persons of other imports
//! - **excluded**: withdrawn persons, never part of either set
//!
//! Pre-merge mode (`merged = false`) takes only the import's pending persons
//! as batch and only merged persons of other imports as population.
//! Post-merge mode (`merged = true`) takes every non-withdrawn person of the
//! import as batch and every non-withdrawn person of any other import as
//! population, so the import never matches against itself.

use crate::db::persons;
use crate::error::DedupResult;
use crate::models::{DisplayFields, Import, MatchSummary, MergeStatus, Person, Score};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// What the classifier needs to know about a scoped person
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMember {
    pub import_id: Uuid,
    pub merge_status: MergeStatus,
    pub display: DisplayFields,
}

/// Resolved scopes for one import
#[derive(Debug, Clone)]
pub struct PopulationScope {
    pub import_id: Uuid,
    pub merged: bool,
    pub batch: BTreeSet<Uuid>,
    pub population: BTreeSet<Uuid>,
    pub excluded: BTreeSet<Uuid>,
    members: HashMap<Uuid, ScopeMember>,
}

impl PopulationScope {
    /// Partition `domain_persons` relative to `import_id`
    pub fn compute(import_id: Uuid, merged: bool, domain_persons: &[Person]) -> Self {
        let mut scope = PopulationScope {
            import_id,
            merged,
            batch: BTreeSet::new(),
            population: BTreeSet::new(),
            excluded: BTreeSet::new(),
            members: HashMap::new(),
        };

        for person in domain_persons {
            if person.withdrawn {
                scope.excluded.insert(person.id);
                continue;
            }

            let in_scope = if person.import_id == import_id {
                let eligible = merged || person.merge_status == MergeStatus::Pending;
                eligible && scope.batch.insert(person.id)
            } else {
                let eligible = merged || person.merge_status == MergeStatus::Merged;
                eligible && scope.population.insert(person.id)
            };

            if in_scope {
                scope.members.insert(
                    person.id,
                    ScopeMember {
                        import_id: person.import_id,
                        merge_status: person.merge_status,
                        display: person.display_fields(),
                    },
                );
            }
        }

        // Nothing to evaluate, nothing to compare against
        if scope.batch.is_empty() {
            scope.population.clear();
            scope.members.clear();
        }

        scope
    }

    /// True when the import has no persons to classify
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn in_batch(&self, person_id: &Uuid) -> bool {
        self.batch.contains(person_id)
    }

    pub fn in_population(&self, person_id: &Uuid) -> bool {
        self.population.contains(person_id)
    }

    pub fn member(&self, person_id: &Uuid) -> Option<&ScopeMember> {
        self.members.get(person_id)
    }

    /// Match summary for `target`, or `None` if it is not in scope
    pub fn summary_for(&self, target_id: Uuid, score: Score) -> Option<MatchSummary> {
        self.members.get(&target_id).map(|member| MatchSummary {
            target_id,
            score,
            display: member.display.clone(),
            target_import_id: member.import_id,
            target_merged: member.merge_status == MergeStatus::Merged,
        })
    }
}

/// Resolves [`PopulationScope`]s from the database
pub struct PopulationScopeResolver {
    db: Pool<Sqlite>,
}

impl PopulationScopeResolver {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Resolve the scopes of `import` within its domain
    pub async fn resolve(&self, import: &Import, merged: bool) -> DedupResult<PopulationScope> {
        let mut conn = self.db.acquire().await?;
        self.resolve_in(&mut conn, import, merged).await
    }

    /// Resolve on `conn`, typically inside the caller's read transaction
    pub async fn resolve_in(
        &self,
        conn: &mut SqliteConnection,
        import: &Import,
        merged: bool,
    ) -> DedupResult<PopulationScope> {
        let domain_persons = persons::load_domain_members(&mut *conn, import.domain_id).await?;
        let scope = PopulationScope::compute(import.id, merged, &domain_persons);

        tracing::debug!(
            import_id = %import.id,
            merged,
            batch = scope.batch.len(),
            population = scope.population.len(),
            excluded = scope.excluded.len(),
            "Resolved population scope"
        );
        Ok(scope)
    }
}
