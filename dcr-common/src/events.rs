//! Event types for the DCR event system
//!
//! Provides the shared [`ReconEvent`] enum and the broadcast-based [`EventBus`].
//! Events are fire-and-forget notifications; nothing in the engine depends on
//! a subscriber being present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Reconciliation engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReconEvent {
    /// A staging batch left the queue and started matching
    BatchStarted {
        batch_id: Uuid,
        total_listings: usize,
        timestamp: DateTime<Utc>,
    },

    /// Periodic matching progress
    BatchProgress {
        batch_id: Uuid,
        processed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A staging batch reached a terminal state
    BatchFinished {
        batch_id: Uuid,
        /// Terminal status name (succeeded, failed, cancelled)
        status: String,
        incomplete: bool,
        timestamp: DateTime<Utc>,
    },

    /// A review decision was recorded for one listing
    ReviewDecisionRecorded {
        batch_id: Uuid,
        staging_item_id: i64,
        decision: String,
        timestamp: DateTime<Utc>,
    },

    /// Other pending listings were resolved as a consequence of one decision
    PropagationCompleted {
        batch_id: Uuid,
        trigger_item_id: i64,
        resolved_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Price changes were written to the catalog
    ChangesApplied {
        batch_id: Uuid,
        applied: usize,
        conflicts: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`ReconEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReconEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReconEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReconEvent,
    ) -> Result<usize, broadcast::error::SendError<ReconEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReconEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
