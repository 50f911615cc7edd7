//! Runtime settings loaded from the `settings` table
//!
//! For each setting:
//! 1. Read it from the database
//! 2. If missing, use the built-in default and write it back
//! 3. If unparsable, log a warning and use the built-in default

use crate::models::Score;
use dedup_common::Result;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_THRESHOLD: Score = Score::whole(50);
pub const DEFAULT_MATCH_SUMMARY_LIMIT: usize = 10;
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Engine runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct DedupSettings {
    /// Threshold used when a domain has none configured
    pub default_threshold: Score,
    /// Bound on stored match summaries per scope per person
    pub match_summary_limit: usize,
    /// Budget for retrying lock-contended writes
    pub max_lock_wait_ms: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            match_summary_limit: DEFAULT_MATCH_SUMMARY_LIMIT,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

impl DedupSettings {
    /// Load runtime settings from database
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            default_threshold: get_setting(
                pool,
                "dedup_default_threshold",
                DEFAULT_THRESHOLD,
            )
            .await?,
            match_summary_limit: get_setting(
                pool,
                "dedup_match_summary_limit",
                DEFAULT_MATCH_SUMMARY_LIMIT,
            )
            .await?,
            max_lock_wait_ms: get_setting(
                pool,
                "dedup_database_max_lock_wait_ms",
                DEFAULT_MAX_LOCK_WAIT_MS,
            )
            .await?,
        })
    }
}

async fn get_setting<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value.flatten() {
        Some(raw) => match raw.parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                warn!(
                    key,
                    value = %raw,
                    default = %default.to_string(),
                    "Invalid setting value, using default"
                );
                Ok(default)
            }
        },
        None => {
            info!(key, default = %default.to_string(), "Setting not found, writing default");
            sqlx::query(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
            )
            .bind(key)
            .bind(default.to_string())
            .execute(pool)
            .await?;
            Ok(default)
        }
    }
}
