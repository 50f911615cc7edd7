//! Database access for dedup-engine
//!
//! Repository functions over the shared SQLite schema created by
//! `dedup_common::db::init`. Identifiers are stored as hyphenated lowercase
//! UUID text, whose lexical order matches `Uuid`'s ordering.

pub mod domains;
pub mod imports;
pub mod persons;

use dedup_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in {}: {} ({})", column, value, e)))
}

pub(crate) fn parse_optional_uuid(value: Option<String>, column: &str) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(&v, column)).transpose()
}
