//! Import lifecycle coordination
//!
//! Drives imports through `pending -> uploaded -> in_progress -> finished`
//! (or `upload_error` / `error`), owns the matcher-side domain reference, and
//! hands review-worthy matches to the ticket collaborator once per run.
//!
//! This is the only component that records a user-visible failure state.
//! Lower layers return errors; the coordinator turns matcher failures into
//! `upload_error`/`error` with a diagnostic message and propagates the rest
//! after recording them.

use super::domain_locks::{DomainGuard, DomainLocks};
use super::similarity_store::{IngestReport, SimilarityStore};
use super::statistics::{RecomputeOutcome, StatisticsAggregator};
use super::transitions::ImportTransitions;
use crate::db::{domains, imports, persons};
use crate::error::{DedupError, DedupResult};
use crate::matcher::{MatcherClient, MatcherJobStatus, RawSimilarity, SubmissionEntry, SubmitOutcome};
use crate::models::{DedupStatus, DeduplicationDomain, DomainState, Import, MatcherRef, MergeStatus};
use crate::tickets::{ReviewMatches, TicketSink};
use chrono::Utc;
use dedup_common::events::{DedupEvent, EventBus};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// What a matcher callback did to the domain's imports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackOutcome {
    pub domain_id: Uuid,
    /// Imports that reached `in_progress` in this callback
    pub started: Vec<Uuid>,
    /// Imports that reached `finished`
    pub finished: Vec<Uuid>,
    /// Imports moved to `error`
    pub failed: Vec<Uuid>,
    /// Finished imports whose review tickets could not be created
    pub ticket_failures: Vec<Uuid>,
    pub ingest: Option<IngestReport>,
}

/// Lifecycle coordinator for deduplication domains and their imports
pub struct LifecycleCoordinator {
    db: Pool<Sqlite>,
    matcher: Arc<dyn MatcherClient>,
    tickets: Arc<dyn TicketSink>,
    store: Arc<SimilarityStore>,
    aggregator: Arc<StatisticsAggregator>,
    locks: DomainLocks,
    transitions: ImportTransitions,
    events: EventBus,
}

impl LifecycleCoordinator {
    /// Assemble a coordinator around shared services
    ///
    /// `locks` must be the registry the aggregator was built with.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Pool<Sqlite>,
        matcher: Arc<dyn MatcherClient>,
        tickets: Arc<dyn TicketSink>,
        store: Arc<SimilarityStore>,
        aggregator: Arc<StatisticsAggregator>,
        locks: DomainLocks,
        events: EventBus,
    ) -> Self {
        let transitions = ImportTransitions::new(db.clone()).with_events(events.clone());
        Self {
            db,
            matcher,
            tickets,
            store,
            aggregator,
            locks,
            transitions,
            events,
        }
    }

    pub fn aggregator(&self) -> &Arc<StatisticsAggregator> {
        &self.aggregator
    }

    pub fn store(&self) -> &Arc<SimilarityStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create the matcher-side domain and record its reference
    pub async fn register_matcher_domain(&self, domain_id: Uuid) -> DedupResult<MatcherRef> {
        let _guard = self.locks.acquire(domain_id).await;
        let domain = domains::require_domain(&self.db, domain_id).await?;

        if let Some(existing) = &domain.matcher_ref {
            return Err(DedupError::Configuration(format!(
                "Domain {} already has matcher domain {}",
                domain_id, existing
            )));
        }

        let matcher_ref = self.matcher.create_domain().await?;
        domains::set_matcher_ref(&self.db, domain_id, Some(&matcher_ref)).await?;
        domains::set_state(&self.db, domain_id, DomainState::Clean, None).await?;

        tracing::info!(domain_id = %domain_id, matcher_ref = %matcher_ref, "Matcher domain registered");
        Ok(matcher_ref)
    }

    /// Delete and recreate the matcher-side domain, clearing all stored edges
    ///
    /// Stored duplicate statuses, match lists and counters refer to the old
    /// edges and are reset with them.
    pub async fn reset_matcher_domain(&self, domain_id: Uuid) -> DedupResult<MatcherRef> {
        let guard = self.locks.acquire(domain_id).await;
        let domain = domains::require_domain(&self.db, domain_id).await?;

        if let Some(old) = &domain.matcher_ref {
            self.matcher.delete_domain(old).await?;
            domains::set_matcher_ref(&self.db, domain_id, None).await?;
            tracing::info!(domain_id = %domain_id, matcher_ref = %old, "Matcher domain deleted");
        }

        self.store.replace_pairs(domain_id, &[]).await?;
        self.aggregator.reset_domain_locked(&guard).await?;

        let matcher_ref = self.matcher.create_domain().await?;
        domains::set_matcher_ref(&self.db, domain_id, Some(&matcher_ref)).await?;
        domains::set_state(&self.db, domain_id, DomainState::Clean, None).await?;

        self.events.emit_lossy(DedupEvent::MatcherDomainReset {
            domain_id,
            timestamp: Utc::now(),
        });
        tracing::info!(domain_id = %domain_id, matcher_ref = %matcher_ref, "Matcher domain reset");

        Ok(matcher_ref)
    }

    /// Submit a pending import's images to the matcher
    ///
    /// **Algorithm:**
    /// 1. Require `pending` status and an active matcher reference
    /// 2. Collect `(person, image)` for non-withdrawn pending persons with an image
    /// 3. Accepted: `uploaded`, domain marked dirty
    /// 4. Rejected or unreachable: `upload_error` with the reason
    ///
    /// Returns the import's new status.
    pub async fn submit_import(&self, import_id: Uuid) -> DedupResult<DedupStatus> {
        let mut import = imports::require_import(&self.db, import_id).await?;
        if import.status != DedupStatus::Pending {
            return Err(DedupError::InvalidTransition {
                import_id,
                from: import.status,
                to: DedupStatus::Uploaded,
            });
        }

        let domain = domains::require_domain(&self.db, import.domain_id).await?;
        let matcher_ref = require_matcher_ref(&domain)?;

        let entries: Vec<SubmissionEntry> = persons::load_for_import(&self.db, import_id)
            .await?
            .into_iter()
            .filter(|p| !p.withdrawn && p.merge_status == MergeStatus::Pending)
            .filter_map(|p| {
                p.image_ref.map(|image_ref| SubmissionEntry {
                    person_id: p.id,
                    image_ref,
                })
            })
            .collect();

        tracing::debug!(import_id = %import_id, entries = entries.len(), "Submitting import to matcher");

        match self.matcher.submit(matcher_ref, &entries).await {
            Ok(SubmitOutcome::Accepted) => {
                self.transitions
                    .apply(&mut import, DedupStatus::Uploaded, None)
                    .await?;
                domains::set_state(&self.db, domain.id, DomainState::Dirty, None).await?;
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                self.transitions
                    .apply(&mut import, DedupStatus::UploadError, Some(reason))
                    .await?;
            }
            Err(err) => {
                self.transitions
                    .apply(&mut import, DedupStatus::UploadError, Some(err.to_string()))
                    .await?;
            }
        }

        Ok(import.status)
    }

    /// Asynchronous notification from the matcher for `matcher_ref`
    pub async fn on_matcher_callback(
        &self,
        matcher_ref: &MatcherRef,
        status: MatcherJobStatus,
    ) -> DedupResult<CallbackOutcome> {
        let domain = domains::find_by_matcher_ref(&self.db, matcher_ref)
            .await?
            .ok_or_else(|| {
                DedupError::Configuration(format!(
                    "No deduplication domain holds matcher reference {}",
                    matcher_ref
                ))
            })?;

        let guard = self.locks.acquire(domain.id).await;
        let mut outcome = CallbackOutcome {
            domain_id: domain.id,
            ..CallbackOutcome::default()
        };

        tracing::debug!(domain_id = %domain.id, status = ?status, "Matcher callback received");

        match status {
            MatcherJobStatus::InProgress => {
                self.start_uploaded(domain.id, &mut outcome).await?;
                domains::set_state(&self.db, domain.id, DomainState::Processing, None).await?;
            }
            MatcherJobStatus::Failed { message } => {
                let active = self.start_uploaded(domain.id, &mut outcome).await?;
                self.fail_all(domain.id, active, &message, &mut outcome).await;
            }
            MatcherJobStatus::Completed => {
                let active = self.start_uploaded(domain.id, &mut outcome).await?;
                self.complete_locked(&guard, &domain, active, &mut outcome)
                    .await?;
            }
        }

        Ok(outcome)
    }

    /// Operator retry of a failed import
    pub async fn retry(&self, import_id: Uuid) -> DedupResult<Import> {
        self.transitions.retry(import_id).await
    }

    /// Re-attempt ticket creation for a finished import whose current run
    /// produced none
    ///
    /// Returns `false` when no tickets were pending.
    pub async fn escalate_pending_tickets(&self, import_id: Uuid) -> DedupResult<bool> {
        let import = imports::require_import(&self.db, import_id).await?;
        if !import.tickets_pending() {
            tracing::debug!(import_id = %import_id, status = %import.status, "No review tickets pending");
            return Ok(false);
        }

        let guard = self.locks.acquire(import.domain_id).await;
        let recomputed = self
            .aggregator
            .recompute_for_import_locked(&guard, &import)
            .await?;
        let import = imports::require_import(&self.db, import_id).await?;

        self.create_tickets(&import, &recomputed.matches).await?;
        Ok(true)
    }

    /// Move every `uploaded` import of the domain to `in_progress`
    ///
    /// Returns all imports now `in_progress`.
    async fn start_uploaded(
        &self,
        domain_id: Uuid,
        outcome: &mut CallbackOutcome,
    ) -> DedupResult<Vec<Import>> {
        let mut active = Vec::new();
        for mut import in imports::list_by_status(
            &self.db,
            domain_id,
            &[DedupStatus::Uploaded, DedupStatus::InProgress],
        )
        .await?
        {
            if import.status == DedupStatus::Uploaded {
                self.transitions
                    .apply(&mut import, DedupStatus::InProgress, None)
                    .await?;
                outcome.started.push(import.id);
            }
            active.push(import);
        }
        Ok(active)
    }

    /// Fetch, ingest and classify; finish every active import on success
    async fn complete_locked(
        &self,
        guard: &DomainGuard,
        domain: &DeduplicationDomain,
        active: Vec<Import>,
        outcome: &mut CallbackOutcome,
    ) -> DedupResult<()> {
        let matcher_ref = require_matcher_ref(domain)?;

        let results = match self.matcher.fetch_results(matcher_ref).await {
            Ok(results) => results,
            Err(err) => {
                self.fail_all(domain.id, active, &err.to_string(), outcome).await;
                return Ok(());
            }
        };

        let recomputed = match self.ingest_and_recompute(guard, domain.id, &results, &active).await {
            Ok((report, recomputed)) => {
                outcome.ingest = Some(report);
                recomputed
            }
            Err(err) => {
                self.fail_all(domain.id, active, &err.to_string(), outcome).await;
                return Err(err);
            }
        };

        for (mut import, result) in active.into_iter().zip(recomputed) {
            self.transitions
                .apply(&mut import, DedupStatus::Finished, None)
                .await?;
            outcome.finished.push(import.id);

            let import = imports::require_import(&self.db, import.id).await?;
            if let Err(err) = self.create_tickets(&import, &result.matches).await {
                tracing::warn!(
                    import_id = %import.id,
                    run_id = import.run_id,
                    error = %err,
                    "Review ticket creation failed, will need escalation"
                );
                outcome.ticket_failures.push(import.id);
            }
        }

        domains::set_state(&self.db, domain.id, DomainState::Clean, None).await?;
        Ok(())
    }

    async fn ingest_and_recompute(
        &self,
        guard: &DomainGuard,
        domain_id: Uuid,
        results: &[RawSimilarity],
        active: &[Import],
    ) -> DedupResult<(IngestReport, Vec<RecomputeOutcome>)> {
        let report = self.store.ingest_results(domain_id, results).await?;

        let mut recomputed = Vec::with_capacity(active.len());
        for import in active {
            let current = imports::require_import(&self.db, import.id).await?;
            recomputed.push(
                self.aggregator
                    .recompute_for_import_locked(guard, &current)
                    .await?,
            );
        }

        let processed: BTreeSet<Uuid> = active.iter().map(|i| i.id).collect();
        self.aggregator
            .recompute_domain_locked(guard, &processed)
            .await?;

        Ok((report, recomputed))
    }

    /// Record `error` on every active import and on the domain
    ///
    /// Failures while recording are logged; the original cause wins.
    async fn fail_all(
        &self,
        domain_id: Uuid,
        active: Vec<Import>,
        message: &str,
        outcome: &mut CallbackOutcome,
    ) {
        for mut import in active {
            match self
                .transitions
                .apply(&mut import, DedupStatus::Error, Some(message.to_string()))
                .await
            {
                Ok(_) => outcome.failed.push(import.id),
                Err(err) => tracing::error!(
                    import_id = %import.id,
                    error = %err,
                    "Failed to record import error state"
                ),
            }
        }

        if let Err(err) =
            domains::set_state(&self.db, domain_id, DomainState::Error, Some(message)).await
        {
            tracing::error!(domain_id = %domain_id, error = %err, "Failed to record domain error state");
        }
    }

    /// Hand the run's duplicate sets to the ticket collaborator once
    async fn create_tickets(&self, import: &Import, matches: &ReviewMatches) -> DedupResult<()> {
        if !import.tickets_pending() {
            tracing::debug!(
                import_id = %import.id,
                run_id = import.run_id,
                "Review tickets already created for this run"
            );
            return Ok(());
        }

        self.tickets.create_review_tickets(import, matches).await?;
        imports::mark_tickets_created(&self.db, import.id, import.run_id).await?;

        let batch_matches = matches.batch.match_count();
        let population_matches = matches.population.match_count();
        tracing::info!(
            import_id = %import.id,
            run_id = import.run_id,
            batch_matches,
            population_matches,
            "Review tickets created"
        );
        self.events.emit_lossy(DedupEvent::ReviewTicketsCreated {
            import_id: import.id,
            run_id: import.run_id,
            batch_matches,
            population_matches,
            timestamp: Utc::now(),
        });

        Ok(())
    }
}

fn require_matcher_ref(domain: &DeduplicationDomain) -> DedupResult<&MatcherRef> {
    domain.matcher_ref.as_ref().ok_or_else(|| {
        DedupError::Configuration(format!(
            "Domain {} has no matcher domain configured",
            domain.id
        ))
    })
}
