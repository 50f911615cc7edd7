//! Import (batch) deduplication state machine
//!
//! An import walks `pending -> uploaded -> in_progress -> finished|error`, or
//! `pending -> upload_error`. Failed states return to `pending` only through an
//! explicit operator retry. Any other step is rejected as a programming error.

use crate::error::{DedupError, DedupResult};
use chrono::{DateTime, Utc};
use dedup_common::status::DedupStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub import_id: Uuid,
    pub old_status: DedupStatus,
    pub new_status: DedupStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// A group of persons created together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub name: String,
    pub status: DedupStatus,
    /// Diagnostic for `upload_error`/`error`
    pub error_message: Option<String>,
    /// Persons with at least one qualifying match inside the import
    pub batch_duplicates: u32,
    /// Persons with at least one qualifying match in the population
    pub golden_record_duplicates: u32,
    /// Incremented on every accepted submission
    pub run_id: i64,
    /// Run for which review tickets were last created
    pub tickets_run_id: Option<i64>,
    /// Persons of this import have been finalized into the population
    pub merged: bool,
}

impl Import {
    pub fn new(domain_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain_id,
            name: name.into(),
            status: DedupStatus::Pending,
            error_message: None,
            batch_duplicates: 0,
            golden_record_duplicates: 0,
            run_id: 0,
            tickets_run_id: None,
            merged: false,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Apply one lifecycle step
    ///
    /// `message` is kept only for failed states; any other step clears it.
    /// Entering `uploaded` opens a new run.
    pub fn transition_to(
        &mut self,
        new_status: DedupStatus,
        message: Option<String>,
    ) -> DedupResult<StatusTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(DedupError::InvalidTransition {
                import_id: self.id,
                from: self.status,
                to: new_status,
            });
        }

        let transition = StatusTransition {
            import_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };

        self.status = new_status;
        self.error_message = if new_status.is_failed() { message } else { None };
        if new_status == DedupStatus::Uploaded {
            self.run_id += 1;
        }

        Ok(transition)
    }

    /// Finished run whose review tickets have not been handed off yet
    pub fn tickets_pending(&self) -> bool {
        self.status == DedupStatus::Finished && self.tickets_run_id != Some(self.run_id)
    }
}
