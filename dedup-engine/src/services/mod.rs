//! Deduplication services
//!
//! Leaves first: edge storage, scope resolution, classification, statistics,
//! and the lifecycle coordinator on top.

pub mod classifier;
pub mod domain_locks;
pub mod lifecycle;
pub mod scope_resolver;
pub mod similarity_store;
pub mod statistics;
pub mod transitions;

pub use classifier::{Classification, DuplicateClassifier, DuplicateSet, MatchScope, ScoredMatch};
pub use domain_locks::{DomainGuard, DomainLocks};
pub use lifecycle::{CallbackOutcome, LifecycleCoordinator};
pub use scope_resolver::{PopulationScope, PopulationScopeResolver, ScopeMember};
pub use similarity_store::{IngestReport, SimilarityStore};
pub use statistics::{ImportStatistics, RecomputeOutcome, StatisticsAggregator};
pub use transitions::ImportTransitions;
