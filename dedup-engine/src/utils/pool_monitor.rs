//! Connection pool monitoring utilities
//!
//! Instrumented transactions that log how long a connection was held, to
//! diagnose pool saturation during large edge replacements.

use dedup_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Instant;

/// Logs release timing when the transaction ends, however it ends
struct HoldTimer {
    caller: &'static str,
    acquired_at: Instant,
    released: bool,
}

impl HoldTimer {
    fn release(&mut self, how: &'static str) {
        self.released = true;
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                how,
                "LONG TRANSACTION - connection held for extended period"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms, how, "Connection released");
        }
    }
}

impl Drop for HoldTimer {
    fn drop(&mut self) {
        if !self.released {
            self.release("drop");
        }
    }
}

/// Monitored transaction wrapper
pub struct MonitoredTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
    timer: HoldTimer,
}

impl<'c> MonitoredTransaction<'c> {
    /// Commit the transaction and log release timing
    pub async fn commit(self) -> Result<()> {
        let MonitoredTransaction { tx, mut timer } = self;
        tx.commit().await?;
        timer.release("commit");
        Ok(())
    }

    /// Rollback the transaction and log release timing
    pub async fn rollback(self) -> Result<()> {
        let MonitoredTransaction { tx, mut timer } = self;
        tx.rollback().await?;
        timer.release("rollback");
        Ok(())
    }

    /// Get a mutable reference to the inner transaction
    pub fn inner_mut(&mut self) -> &mut Transaction<'c, Sqlite> {
        &mut self.tx
    }
}

/// Begin a monitored transaction with connection pool timing logs
///
/// # Example
/// ```ignore
/// let mut tx = begin_monitored(&pool, "similarity_store::replace_pairs").await?;
/// sqlx::query("DELETE FROM similarity_pairs WHERE domain_id = ?")
///     .bind(domain_id.to_string())
///     .execute(&mut **tx.inner_mut())
///     .await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored<'c>(
    pool: &'c SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(caller, wait_ms, "Slow connection acquisition");
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx,
        timer: HoldTimer {
            caller,
            acquired_at: Instant::now(),
            released: false,
        },
    })
}
