//! Data models for the deduplication engine

pub mod domain;
pub mod import;
pub mod person;
pub mod score;
pub mod similarity;

pub use domain::{DeduplicationDomain, MatcherRef};
pub use import::{Import, StatusTransition};
pub use person::{DisplayFields, DuplicateStatus, MatchSummary, MergeStatus, Person};
pub use score::Score;
pub use similarity::{PairKey, SimilarityPair, SimilarityStatus};

pub use dedup_common::status::{DedupStatus, DomainState};
