//! Duplicate classification
//!
//! Applies the inclusive score threshold to the edges touching an import's
//! batch and sorts the qualifying matches into two duplicate sets:
//! - **batch**: both endpoints are in the import's own batch (self-pairs excluded)
//! - **population**: the other endpoint is in the finalized population
//!
//! Matches for one person are ordered by score descending, then by target id
//! ascending, so repeated runs over the same edges give identical output.

use super::scope_resolver::{PopulationScope, PopulationScopeResolver};
use super::similarity_store::SimilarityStore;
use crate::error::DedupResult;
use crate::models::{DuplicateStatus, Import, Score, SimilarityPair};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Which scope a duplicate set was classified against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    Batch,
    Population,
}

/// One qualifying match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoredMatch {
    pub target_id: Uuid,
    pub score: Score,
}

/// Qualifying matches of an import's batch persons in one scope
///
/// Batch-internal pairs are recorded once, under their lower endpoint;
/// [`DuplicateSet::per_person`] gives the view from both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateSet {
    pub import_id: Uuid,
    pub scope: MatchScope,
    pub threshold: Score,
    evaluated: BTreeSet<Uuid>,
    matches: BTreeMap<Uuid, Vec<ScoredMatch>>,
}

impl DuplicateSet {
    pub fn empty(import_id: Uuid, scope: MatchScope, threshold: Score) -> Self {
        Self {
            import_id,
            scope,
            threshold,
            evaluated: BTreeSet::new(),
            matches: BTreeMap::new(),
        }
    }

    /// Persons that were classified (the import's batch)
    pub fn evaluated(&self) -> &BTreeSet<Uuid> {
        &self.evaluated
    }

    /// Recorded matches, keyed by source person
    pub fn entries(&self) -> &BTreeMap<Uuid, Vec<ScoredMatch>> {
        &self.matches
    }

    /// Matches recorded under `person_id`
    pub fn matches_for(&self, person_id: &Uuid) -> &[ScoredMatch] {
        self.matches.get(person_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every evaluated person's matches, seen from that person
    pub fn per_person(&self) -> BTreeMap<Uuid, Vec<ScoredMatch>> {
        let mut view = self.matches.clone();

        if self.scope == MatchScope::Batch {
            for (source, targets) in &self.matches {
                for target in targets {
                    view.entry(target.target_id).or_default().push(ScoredMatch {
                        target_id: *source,
                        score: target.score,
                    });
                }
            }
            view.values_mut().for_each(|list| sort_matches(list));
        }

        view
    }

    /// Status of an evaluated person with at least one match in this scope
    pub fn matched_status(&self) -> DuplicateStatus {
        match self.scope {
            MatchScope::Batch => DuplicateStatus::DuplicateInBatch,
            MatchScope::Population => DuplicateStatus::Duplicate,
        }
    }

    /// Status of `person_id` in this scope
    ///
    /// Scans the recorded batch matches; use [`Self::per_person`] when
    /// classifying every person of a set.
    pub fn status_of(&self, person_id: &Uuid) -> DuplicateStatus {
        if !self.evaluated.contains(person_id) {
            return DuplicateStatus::NotProcessed;
        }

        let matched = match self.scope {
            MatchScope::Population => self.matches.contains_key(person_id),
            MatchScope::Batch => {
                self.matches.contains_key(person_id)
                    || self
                        .matches
                        .values()
                        .any(|targets| targets.iter().any(|m| m.target_id == *person_id))
            }
        };

        if matched {
            self.matched_status()
        } else {
            DuplicateStatus::Unique
        }
    }

    /// Number of evaluated persons with at least one match
    pub fn duplicate_count(&self) -> u32 {
        self.per_person().len() as u32
    }

    /// Number of recorded matches
    pub fn match_count(&self) -> usize {
        self.matches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

fn sort_matches(list: &mut [ScoredMatch]) {
    list.sort_by(|a, b| b.score.cmp(&a.score).then(a.target_id.cmp(&b.target_id)));
}

/// Both duplicate sets of one import, computed from a single edge snapshot
#[derive(Debug, Clone)]
pub struct Classification {
    pub scope: PopulationScope,
    pub batch: DuplicateSet,
    pub population: DuplicateSet,
}

/// Classify `edges` against a resolved scope
///
/// Edges below `threshold`, no-match markers and self-pairs never qualify.
pub fn classify_edges(
    scope: &PopulationScope,
    edges: &[SimilarityPair],
    threshold: Score,
) -> (DuplicateSet, DuplicateSet) {
    let mut batch = DuplicateSet::empty(scope.import_id, MatchScope::Batch, threshold);
    let mut population = DuplicateSet::empty(scope.import_id, MatchScope::Population, threshold);
    batch.evaluated = scope.batch.clone();
    population.evaluated = scope.batch.clone();

    if scope.is_empty() {
        return (batch, population);
    }

    for edge in edges {
        let Some(second) = edge.second() else {
            continue;
        };
        if edge.is_self_pair() || !edge.score().meets(threshold) {
            continue;
        }
        let first = edge.first();

        if scope.in_batch(&first) && scope.in_batch(&second) {
            batch.matches.entry(first).or_default().push(ScoredMatch {
                target_id: second,
                score: edge.score(),
            });
            continue;
        }

        for (source, other) in [(first, second), (second, first)] {
            if scope.in_batch(&source) && scope.in_population(&other) {
                population.matches.entry(source).or_default().push(ScoredMatch {
                    target_id: other,
                    score: edge.score(),
                });
            }
        }
    }

    batch.matches.values_mut().for_each(|list| sort_matches(list));
    population.matches.values_mut().for_each(|list| sort_matches(list));

    (batch, population)
}

/// Classifies an import's batch persons against its scopes
pub struct DuplicateClassifier {
    resolver: PopulationScopeResolver,
    store: Arc<SimilarityStore>,
}

impl DuplicateClassifier {
    pub fn new(resolver: PopulationScopeResolver, store: Arc<SimilarityStore>) -> Self {
        Self { resolver, store }
    }

    /// Resolve scopes once, fetch the edges touching the batch once, and
    /// classify in both modes
    ///
    /// Persons and edges are read in one transaction, so a concurrent edge
    /// replacement is seen either entirely or not at all.
    pub async fn classify(
        &self,
        import: &Import,
        threshold: Score,
        merged: bool,
    ) -> DedupResult<Classification> {
        let mut snapshot = self.store.begin_snapshot("classifier::classify").await?;

        let scope = self
            .resolver
            .resolve_in(&mut **snapshot.inner_mut(), import, merged)
            .await?;

        let edges = if scope.is_empty() {
            tracing::debug!(import_id = %import.id, "No persons to classify");
            Vec::new()
        } else {
            self.store
                .edges_touching_in(&mut **snapshot.inner_mut(), import.domain_id, &scope.batch)
                .await?
        };
        snapshot.commit().await?;

        let (batch, population) = classify_edges(&scope, &edges, threshold);

        tracing::debug!(
            import_id = %import.id,
            merged,
            threshold = %threshold,
            edges = edges.len(),
            batch_matches = batch.match_count(),
            population_matches = population.match_count(),
            "Classified import"
        );

        Ok(Classification {
            scope,
            batch,
            population,
        })
    }

    /// Matches of the import's batch against the finalized population
    pub async fn classify_against_population(
        &self,
        import: &Import,
        threshold: Score,
        merged: bool,
    ) -> DedupResult<DuplicateSet> {
        Ok(self.classify(import, threshold, merged).await?.population)
    }

    /// Matches within the import's own batch
    pub async fn classify_against_batch(
        &self,
        import: &Import,
        threshold: Score,
    ) -> DedupResult<DuplicateSet> {
        Ok(self.classify(import, threshold, import.merged).await?.batch)
    }
}
