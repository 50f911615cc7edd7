//! Per-domain single-writer discipline
//!
//! A domain's edge replacement and the classification that reads those edges
//! run under the same guard, so no classifier observes a half-replaced edge
//! set. Different domains never contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry of per-domain async mutexes
#[derive(Clone, Default)]
pub struct DomainLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

/// Held for the duration of a replace + recompute unit of work
pub struct DomainGuard {
    domain_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl DomainGuard {
    pub fn domain_id(&self) -> Uuid {
        self.domain_id
    }
}

impl std::fmt::Debug for DomainGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainGuard")
            .field("domain_id", &self.domain_id)
            .finish()
    }
}

impl DomainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `domain_id`
    pub async fn acquire(&self, domain_id: Uuid) -> DomainGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(domain_id).or_default())
        };

        tracing::trace!(domain_id = %domain_id, "Waiting for domain lock");
        let guard = lock.lock_owned().await;
        tracing::trace!(domain_id = %domain_id, "Domain lock acquired");

        DomainGuard {
            domain_id,
            _guard: guard,
        }
    }

    /// Non-blocking variant; `None` if another worker holds the domain
    pub async fn try_acquire(&self, domain_id: Uuid) -> Option<DomainGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(domain_id).or_default())
        };

        lock.try_lock_owned().ok().map(|guard| DomainGuard {
            domain_id,
            _guard: guard,
        })
    }
}
