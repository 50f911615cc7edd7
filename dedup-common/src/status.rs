//! Status vocabularies shared between the engine and event consumers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deduplication lifecycle status of an import
///
/// ```text
/// pending ──► uploaded ──► in_progress ──► finished
///    │                          │
///    ▼                          ▼
/// upload_error               error
///    │                          │
///    └──────── retry ───────────┴──► pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStatus {
    /// Created, not yet submitted to the matcher
    Pending,
    /// Submission accepted by the matcher
    Uploaded,
    /// Submission failed
    UploadError,
    /// Matcher reported that processing started
    InProgress,
    /// Results ingested and statistics recomputed
    Finished,
    /// Result fetch or classification failed
    Error,
}

impl DedupStatus {
    pub const ALL: [DedupStatus; 6] = [
        DedupStatus::Pending,
        DedupStatus::Uploaded,
        DedupStatus::UploadError,
        DedupStatus::InProgress,
        DedupStatus::Finished,
        DedupStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DedupStatus::Pending => "pending",
            DedupStatus::Uploaded => "uploaded",
            DedupStatus::UploadError => "upload_error",
            DedupStatus::InProgress => "in_progress",
            DedupStatus::Finished => "finished",
            DedupStatus::Error => "error",
        }
    }

    /// Whether `self -> next` is a legal single step
    ///
    /// `error | upload_error -> pending` is the operator retry.
    pub fn can_transition_to(&self, next: DedupStatus) -> bool {
        use DedupStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded)
                | (Pending, UploadError)
                | (Uploaded, InProgress)
                | (InProgress, Finished)
                | (InProgress, Error)
                | (Error, Pending)
                | (UploadError, Pending)
        )
    }

    /// Failed states that accept an operator retry
    pub fn is_failed(&self) -> bool {
        matches!(self, DedupStatus::Error | DedupStatus::UploadError)
    }

    /// Waiting on the matcher
    pub fn is_awaiting_matcher(&self) -> bool {
        matches!(self, DedupStatus::Uploaded | DedupStatus::InProgress)
    }
}

impl fmt::Display for DedupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DedupStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown dedup status: {}", s)))
    }
}

/// State of a deduplication domain relative to the external matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    /// Stored edges reflect everything submitted so far
    Clean,
    /// New persons submitted, results not yet ingested
    Dirty,
    /// Matcher is processing
    Processing,
    /// Last run failed
    Error,
}

impl DomainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainState::Clean => "clean",
            DomainState::Dirty => "dirty",
            DomainState::Processing => "processing",
            DomainState::Error => "error",
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(DomainState::Clean),
            "dirty" => Ok(DomainState::Dirty),
            "processing" => Ok(DomainState::Processing),
            "error" => Ok(DomainState::Error),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown domain state: {}",
                other
            ))),
        }
    }
}
