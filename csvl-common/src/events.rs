//! Event types for the csvl event system
//!
//! The loader reports run progress through an [`EventBus`]. Subscribers (the
//! CLI's progress line, tests) receive every event emitted after they
//! subscribed. Emission never blocks the pipeline: when nobody listens the
//! event is dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Loader event types
///
/// Events can be serialized for machine-readable progress output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoaderEvent {
    /// Batch application started
    RunStarted {
        /// Identifier of this run (appears in every log line of the run)
        run_id: Uuid,
        /// Resources queued for this run
        total: usize,
        /// Resources per chunk
        concurrency: usize,
        /// When the run started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A chunk settled
    ///
    /// `processed` is monotonically non-decreasing within a run and reaches
    /// `total` exactly once.
    Progress {
        /// What is being processed
        label: String,
        /// Resources with a determined outcome
        processed: usize,
        /// Resources in the run
        total: usize,
    },

    /// One resource could not be applied
    RecordFailed {
        /// Source row ordinal of the resource
        ordinal: usize,
        /// Failure reason as recorded in the ledger
        reason: String,
    },

    /// Batch application finished (or stopped at a chunk barrier)
    RunCompleted {
        /// Identifier of this run
        run_id: Uuid,
        /// Resources applied successfully
        success_count: usize,
        /// Resources that failed
        failure_count: usize,
        /// Whether the run stopped before dispatching every chunk
        cancelled: bool,
        /// When the run finished
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl LoaderEvent {
    /// Percentage for progress events, `None` for everything else
    ///
    /// An empty run reports 100%.
    pub fn percentage(&self) -> Option<u32> {
        match self {
            LoaderEvent::Progress { processed, total, .. } => {
                if *total == 0 {
                    Some(100)
                } else {
                    Some(((*processed as f64 * 100.0) / *total as f64).round() as u32)
                }
            }
            _ => None,
        }
    }
}

/// Broadcast bus for [`LoaderEvent`]s
///
/// Cloning the bus yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LoaderEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers
    ///   start missing old events
    ///
    /// # Examples
    ///
    /// ```
    /// use csvl_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LoaderEvent,
    ) -> Result<usize, broadcast::error::SendError<LoaderEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// # Examples
    ///
    /// ```
    /// use csvl_common::events::{EventBus, LoaderEvent};
    ///
    /// let event_bus = EventBus::new(16);
    ///
    /// event_bus.emit_lossy(LoaderEvent::Progress {
    ///     label: "Creating/updating resources".to_string(),
    ///     processed: 10,
    ///     total: 40,
    /// });
    /// ```
    pub fn emit_lossy(&self, event: LoaderEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for processed in [2, 4] {
            bus.emit(LoaderEvent::Progress {
                label: "test".to_string(),
                processed,
                total: 4,
            })
            .unwrap();
        }

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.percentage(), Some(50));
        assert_eq!(second.percentage(), Some(100));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);

        let event = LoaderEvent::RecordFailed {
            ordinal: 3,
            reason: "rejected".to_string(),
        };
        assert!(bus.emit(event.clone()).is_err());

        // Lossy emission never fails
        bus.emit_lossy(event);
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_percentage_of_empty_run() {
        let event = LoaderEvent::Progress {
            label: "x".to_string(),
            processed: 0,
            total: 0,
        };
        assert_eq!(event.percentage(), Some(100));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = LoaderEvent::RecordFailed {
            ordinal: 7,
            reason: "bad".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RecordFailed");
        assert_eq!(json["ordinal"], 7);
    }
}
