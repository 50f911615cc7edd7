//! Deduplication domain (one per program)

use super::Score;
use dedup_common::status::DomainState;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of the domain on the external matcher's side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatcherRef(pub String);

impl MatcherRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatcherRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of isolation for matching
///
/// At most one active matcher reference exists per domain; it is NULL until the
/// matcher-side domain is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationDomain {
    pub id: Uuid,
    pub name: String,
    pub matcher_ref: Option<MatcherRef>,
    /// Inclusive threshold; falls back to the runtime default when unset
    pub threshold: Option<Score>,
    pub state: DomainState,
    pub error_message: Option<String>,
}

impl DeduplicationDomain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            matcher_ref: None,
            threshold: None,
            state: DomainState::Clean,
            error_message: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_threshold(mut self, threshold: Score) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn effective_threshold(&self, default: Score) -> Score {
        self.threshold.unwrap_or(default)
    }
}
