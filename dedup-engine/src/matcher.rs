//! External face-matching service interface
//!
//! The HTTP client lives outside this crate. The engine only needs to create
//! and delete a matcher-side domain, submit images, and fetch score triples.

use crate::models::MatcherRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One image submitted for matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub person_id: Uuid,
    pub image_ref: String,
}

/// Matcher's answer to a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected { reason: String },
}

/// Raw result triple as returned by the matcher
///
/// Either endpoint may be missing. Score is a percentage, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSimilarity {
    pub score: f64,
    pub first: Option<Uuid>,
    pub second: Option<Uuid>,
    pub status_code: u16,
}

/// Processing status reported by the matcher's callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatcherJobStatus {
    /// Matcher accepted the work and started processing
    InProgress,
    /// Results are ready to fetch
    Completed,
    /// Matcher gave up on the job
    Failed { message: String },
}

/// Matcher transport failures
#[derive(Debug, Clone, Error)]
pub enum MatcherError {
    #[error("matcher unreachable: {0}")]
    Unreachable(String),

    #[error("matcher rate limit exceeded")]
    RateLimited,

    #[error("matcher responded with error: {0}")]
    Upstream(String),
}

/// Client for the external matcher
#[async_trait::async_trait]
pub trait MatcherClient: Send + Sync {
    /// Create a matcher-side domain and return its reference
    async fn create_domain(&self) -> Result<MatcherRef, MatcherError>;

    /// Submit `(person, image)` pairs for matching within `domain`
    async fn submit(
        &self,
        domain: &MatcherRef,
        entries: &[SubmissionEntry],
    ) -> Result<SubmitOutcome, MatcherError>;

    /// Fetch every score triple computed for `domain`
    async fn fetch_results(&self, domain: &MatcherRef) -> Result<Vec<RawSimilarity>, MatcherError>;

    /// Delete the matcher-side domain
    async fn delete_domain(&self, domain: &MatcherRef) -> Result<(), MatcherError>;
}
