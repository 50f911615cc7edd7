//! Similarity edges between persons

use super::Score;
use crate::error::{DedupError, DedupResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status code the matcher attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimilarityStatus {
    /// Pair found (200)
    Found,
    /// No face / no match for the person (404)
    NotFound,
    /// Matcher throttled this lookup (429)
    RateLimited,
    /// Any other code, kept verbatim for audit
    Other(u16),
}

impl SimilarityStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => SimilarityStatus::Found,
            404 => SimilarityStatus::NotFound,
            429 => SimilarityStatus::RateLimited,
            other => SimilarityStatus::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            SimilarityStatus::Found => 200,
            SimilarityStatus::NotFound => 404,
            SimilarityStatus::RateLimited => 429,
            SimilarityStatus::Other(code) => *code,
        }
    }
}

/// Canonical unordered pair key: smaller id first, `None` for no-match markers
pub type PairKey = (Uuid, Option<Uuid>);

/// A scored edge between two persons of one domain
///
/// Always canonical: when both endpoints are present `first <= second`, and a
/// lone endpoint always sits in `first`. Self-pairs and missing second endpoints
/// are legal and mark "no match found" / rate-limited results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityPair {
    first: Uuid,
    second: Option<Uuid>,
    score: Score,
    status: SimilarityStatus,
}

impl SimilarityPair {
    /// Build a pair, putting the endpoints in canonical order
    pub fn new(a: Uuid, b: Option<Uuid>, score: Score, status: SimilarityStatus) -> Self {
        let (first, second) = match b {
            Some(b) if b < a => (b, Some(a)),
            other => (a, other),
        };
        Self {
            first,
            second,
            score,
            status,
        }
    }

    /// Found pair between two persons
    pub fn found(a: Uuid, b: Uuid, score: Score) -> Self {
        Self::new(a, Some(b), score, SimilarityStatus::Found)
    }

    /// "No match" marker for a single person
    pub fn no_match(person: Uuid, status: SimilarityStatus) -> Self {
        Self::new(person, None, Score::MIN, status)
    }

    /// Rebuild a pair read back from storage
    ///
    /// Storage only ever receives canonical pairs, so a non-canonical row means
    /// something wrote around the store.
    pub fn from_stored(
        first: Uuid,
        second: Option<Uuid>,
        score: Score,
        status: SimilarityStatus,
    ) -> DedupResult<Self> {
        if let Some(second) = second {
            if second < first {
                return Err(DedupError::InvariantViolation(format!(
                    "Non-canonical stored edge ({}, {})",
                    first, second
                )));
            }
        }
        Ok(Self {
            first,
            second,
            score,
            status,
        })
    }

    pub fn first(&self) -> Uuid {
        self.first
    }

    pub fn second(&self) -> Option<Uuid> {
        self.second
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn status(&self) -> SimilarityStatus {
        self.status
    }

    pub fn key(&self) -> PairKey {
        (self.first, self.second)
    }

    pub fn is_no_match_marker(&self) -> bool {
        self.second.is_none()
    }

    pub fn is_self_pair(&self) -> bool {
        self.second == Some(self.first)
    }

    /// The opposite endpoint of `person`, if `person` is on this edge
    pub fn other(&self, person: Uuid) -> Option<Uuid> {
        let second = self.second?;
        if person == self.first {
            Some(second)
        } else if person == second {
            Some(self.first)
        } else {
            None
        }
    }
}
