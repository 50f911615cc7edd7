//! Event types for the deduplication engine
//!
//! Lifecycle transitions and recompute summaries are broadcast on an
//! [`EventBus`] so reporting layers can follow an import without polling the
//! database. Emission never blocks and never fails the operation that emitted.

use crate::status::DedupStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Deduplication events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DedupEvent {
    /// An import moved to a new lifecycle status
    ImportStatusChanged {
        import_id: Uuid,
        domain_id: Uuid,
        old_status: DedupStatus,
        new_status: DedupStatus,
        /// Diagnostic message for failed states
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Counters and match summaries were rewritten for an import
    StatisticsRecomputed {
        import_id: Uuid,
        batch_duplicates: u32,
        golden_record_duplicates: u32,
        timestamp: DateTime<Utc>,
    },

    /// Review tickets were handed to the ticket collaborator
    ReviewTicketsCreated {
        import_id: Uuid,
        run_id: i64,
        batch_matches: usize,
        population_matches: usize,
        timestamp: DateTime<Utc>,
    },

    /// A domain's external matcher reference was recreated and its edges cleared
    MatcherDomainReset {
        domain_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl DedupEvent {
    /// Event type name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            DedupEvent::ImportStatusChanged { .. } => "ImportStatusChanged",
            DedupEvent::StatisticsRecomputed { .. } => "StatisticsRecomputed",
            DedupEvent::ReviewTicketsCreated { .. } => "ReviewTicketsCreated",
            DedupEvent::MatcherDomainReset { .. } => "MatcherDomainReset",
        }
    }
}

/// Broadcast bus for [`DedupEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DedupEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DedupEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DedupEvent) -> Result<usize, broadcast::error::SendError<DedupEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DedupEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            tracing::trace!(event_type, "No subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
