//! Review ticket collaborator interface

use crate::models::Import;
use crate::services::classifier::DuplicateSet;
use thiserror::Error;

/// Duplicate sets handed over when an import finishes
#[derive(Debug, Clone)]
pub struct ReviewMatches {
    pub batch: DuplicateSet,
    pub population: DuplicateSet,
}

impl ReviewMatches {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty() && self.population.is_empty()
    }
}

#[derive(Debug, Clone, Error)]
#[error("ticket creation failed: {0}")]
pub struct TicketError(pub String);

/// Creates review tickets for qualifying matches
///
/// Invoked once per successful run of an import.
#[async_trait::async_trait]
pub trait TicketSink: Send + Sync {
    async fn create_review_tickets(
        &self,
        import: &Import,
        matches: &ReviewMatches,
    ) -> Result<(), TicketError>;
}
