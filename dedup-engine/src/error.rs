//! Error types for dedup-engine
//!
//! Error taxonomy:
//! - **Configuration** - required setup missing (e.g. no matcher domain); fatal to the
//!   requested operation, never retried automatically
//! - **Matcher** - transient upstream failures; recorded as `upload_error`/`error`
//!   on the import by the lifecycle coordinator
//! - **InvalidTransition / InvariantViolation** - core bugs; fail loudly
//! - **Storage** - database failures, propagated to the coordinator
//!
//! Data errors (noisy matcher output) never surface here: the offending edge is
//! dropped with a warning.

use crate::matcher::MatcherError;
use crate::tickets::TicketError;
use dedup_common::status::DedupStatus;
use thiserror::Error;
use uuid::Uuid;

/// Engine error type
#[derive(Debug, Error)]
pub enum DedupError {
    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// External matcher failed or was unreachable
    #[error("Matcher error: {0}")]
    Matcher(#[from] MatcherError),

    /// Ticket collaborator failed
    #[error("Ticket error: {0}")]
    Ticket(#[from] TicketError),

    /// Out-of-order lifecycle transition
    #[error("Invalid transition for import {import_id}: {from} -> {to}")]
    InvalidTransition {
        import_id: Uuid,
        from: DedupStatus,
        to: DedupStatus,
    },

    /// Core invariant broken (non-canonical edge, score out of range, duplicate edge)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage failure, including missing domains/imports
    #[error("Storage error: {0}")]
    Storage(#[from] dedup_common::Error),
}

impl DedupError {
    /// Programming errors that must never be retried or recorded as a transient state
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DedupError::InvalidTransition { .. } | DedupError::InvariantViolation(_)
        )
    }

    /// Failures an operator may clear with a retry
    pub fn is_transient(&self) -> bool {
        matches!(self, DedupError::Matcher(_))
    }
}

impl From<sqlx::Error> for DedupError {
    fn from(err: sqlx::Error) -> Self {
        DedupError::Storage(dedup_common::Error::Database(err))
    }
}

/// Result type for engine operations
pub type DedupResult<T> = Result<T, DedupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DedupError::InvariantViolation("x".into()).is_fatal());
        assert!(DedupError::InvalidTransition {
            import_id: Uuid::nil(),
            from: DedupStatus::Pending,
            to: DedupStatus::Finished,
        }
        .is_fatal());
        assert!(!DedupError::Configuration("x".into()).is_fatal());
        assert!(!DedupError::Storage(dedup_common::Error::NotFound("x".into())).is_fatal());
    }

    #[test]
    fn test_matcher_errors_are_transient() {
        let err = DedupError::from(MatcherError::RateLimited);
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }
}
