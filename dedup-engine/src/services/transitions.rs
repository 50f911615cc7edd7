//! Import lifecycle transitions
//!
//! The only place an import's dedup status is written. Each transition is
//! validated in memory, then stored compare-and-set against the previous
//! status; losing that race is reported as an invalid transition.

use crate::db::imports;
use crate::error::{DedupError, DedupResult};
use crate::models::{DedupStatus, Import, StatusTransition};
use dedup_common::events::{DedupEvent, EventBus};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

pub struct ImportTransitions {
    db: Pool<Sqlite>,
    events: Option<EventBus>,
}

impl ImportTransitions {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db, events: None }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Move `import` to `next`, persisting and broadcasting the change
    ///
    /// `import` is updated only if the stored transition succeeded.
    pub async fn apply(
        &self,
        import: &mut Import,
        next: DedupStatus,
        message: Option<String>,
    ) -> DedupResult<StatusTransition> {
        let mut updated = import.clone();
        let transition = updated.transition_to(next, message)?;

        if !imports::save_transition(&self.db, &updated, &transition).await? {
            let stored = imports::require_import(&self.db, import.id).await?;
            return Err(DedupError::InvalidTransition {
                import_id: import.id,
                from: stored.status,
                to: next,
            });
        }
        *import = updated;

        if next.is_failed() {
            tracing::error!(
                import_id = %import.id,
                from = %transition.old_status,
                to = %next,
                message = import.error_message.as_deref().unwrap_or(""),
                "Import deduplication failed"
            );
        } else {
            tracing::info!(
                import_id = %import.id,
                from = %transition.old_status,
                to = %next,
                run_id = import.run_id,
                "Import status changed"
            );
        }

        if let Some(events) = &self.events {
            events.emit_lossy(DedupEvent::ImportStatusChanged {
                import_id: import.id,
                domain_id: import.domain_id,
                old_status: transition.old_status,
                new_status: next,
                message: import.error_message.clone(),
                timestamp: transition.transitioned_at,
            });
        }

        Ok(transition)
    }

    /// Operator retry: `error | upload_error -> pending`
    pub async fn retry(&self, import_id: Uuid) -> DedupResult<Import> {
        let mut import = imports::require_import(&self.db, import_id).await?;
        self.apply(&mut import, DedupStatus::Pending, None).await?;
        Ok(import)
    }
}
