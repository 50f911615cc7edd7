//! # Dedup Common Library
//!
//! Shared code for the deduplication workspace:
//! - Error types
//! - Bootstrap configuration loading and logging setup
//! - Database bootstrap (schema, pragmas, default settings, migrations)
//! - Status vocabularies (import lifecycle, domain state)
//! - Event types (DedupEvent enum) and the EventBus

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod status;

pub use error::{Error, Result};
