//! Person records and their per-scope duplicate fields
//!
//! Persons are owned by the surrounding case-management system. The engine only
//! writes the duplicate-status fields and match summaries.

use super::Score;
use crate::error::{DedupError, DedupResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Whether a person is provisional or finalized into the population
///
/// Transitions exactly once, `pending -> merged`, and is never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Merged,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::Pending => "pending",
            MergeStatus::Merged => "merged",
        }
    }
}

impl FromStr for MergeStatus {
    type Err = dedup_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MergeStatus::Pending),
            "merged" => Ok(MergeStatus::Merged),
            other => Err(dedup_common::Error::InvalidInput(format!(
                "Unknown merge status: {}",
                other
            ))),
        }
    }
}

/// Duplicate classification for one scope (batch or population)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStatus {
    /// Classified, no qualifying match
    Unique,
    /// At least one qualifying match in the finalized population
    Duplicate,
    /// At least one qualifying match among the import's own pending persons
    DuplicateInBatch,
    /// No classification has run (distinct from `Unique`)
    #[default]
    NotProcessed,
}

impl DuplicateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStatus::Unique => "unique",
            DuplicateStatus::Duplicate => "duplicate",
            DuplicateStatus::DuplicateInBatch => "duplicate_in_batch",
            DuplicateStatus::NotProcessed => "not_processed",
        }
    }
}

impl fmt::Display for DuplicateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateStatus {
    type Err = dedup_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unique" => Ok(DuplicateStatus::Unique),
            "duplicate" => Ok(DuplicateStatus::Duplicate),
            "duplicate_in_batch" => Ok(DuplicateStatus::DuplicateInBatch),
            "not_processed" => Ok(DuplicateStatus::NotProcessed),
            other => Err(dedup_common::Error::InvalidInput(format!(
                "Unknown duplicate status: {}",
                other
            ))),
        }
    }
}

/// Fields shown next to a match in review screens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFields {
    pub full_name: String,
    pub registration_ref: Option<String>,
}

/// One entry of a person's bounded match list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub target_id: Uuid,
    pub score: Score,
    pub display: DisplayFields,
    /// Import the matched person belongs to
    pub target_import_id: Uuid,
    /// Matched person was already finalized when the summary was written
    pub target_merged: bool,
}

/// A person being deduplicated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub import_id: Uuid,
    pub full_name: String,
    pub registration_ref: Option<String>,
    /// Reference the matcher uses to fetch the person's photo
    pub image_ref: Option<String>,
    pub merge_status: MergeStatus,
    pub withdrawn: bool,
    pub batch_status: DuplicateStatus,
    pub population_status: DuplicateStatus,
    pub batch_matches: Vec<MatchSummary>,
    pub population_matches: Vec<MatchSummary>,
}

impl Person {
    /// New pending person in `import_id`, not yet classified
    pub fn new(import_id: Uuid, full_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            import_id,
            full_name: full_name.into(),
            registration_ref: None,
            image_ref: None,
            merge_status: MergeStatus::Pending,
            withdrawn: false,
            batch_status: DuplicateStatus::NotProcessed,
            population_status: DuplicateStatus::NotProcessed,
            batch_matches: Vec::new(),
            population_matches: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn with_registration_ref(mut self, registration_ref: impl Into<String>) -> Self {
        self.registration_ref = Some(registration_ref.into());
        self
    }

    pub fn display_fields(&self) -> DisplayFields {
        DisplayFields {
            full_name: self.full_name.clone(),
            registration_ref: self.registration_ref.clone(),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.merge_status == MergeStatus::Merged
    }

    /// Finalize the person; a second call is a programming error
    pub fn mark_merged(&mut self) -> DedupResult<()> {
        if self.is_merged() {
            return Err(DedupError::InvariantViolation(format!(
                "Person {} is already merged",
                self.id
            )));
        }
        self.merge_status = MergeStatus::Merged;
        Ok(())
    }
}
