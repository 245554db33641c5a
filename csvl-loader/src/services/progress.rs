//! Run progress reporting
//!
//! The orchestrator reports through [`ProgressSink`]; the CLI plugs in an
//! [`EventProgress`] that forwards everything onto the [`EventBus`].

use crate::models::{Ledger, UpsertOutcome};
use chrono::Utc;
use csvl_common::events::{EventBus, LoaderEvent};
use uuid::Uuid;

/// Label used for the batch application phase
pub const APPLY_LABEL: &str = "Creating/updating resources";

/// Receiver of run progress
pub trait ProgressSink: Send + Sync {
    /// A chunk settled; `processed` of `total` resources have an outcome
    fn progress(&self, label: &str, processed: usize, total: usize);

    fn started(&self, _total: usize, _concurrency: usize) {}

    fn failed(&self, _outcome: &UpsertOutcome) {}

    fn finished(&self, _ledger: &Ledger) {}
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _label: &str, _processed: usize, _total: usize) {}
}

/// Forwards progress onto an [`EventBus`] under one run id
#[derive(Clone)]
pub struct EventProgress {
    event_bus: EventBus,
    run_id: Uuid,
}

impl EventProgress {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl ProgressSink for EventProgress {
    fn progress(&self, label: &str, processed: usize, total: usize) {
        self.event_bus.emit_lossy(LoaderEvent::Progress {
            label: label.to_string(),
            processed,
            total,
        });
    }

    fn started(&self, total: usize, concurrency: usize) {
        self.event_bus.emit_lossy(LoaderEvent::RunStarted {
            run_id: self.run_id,
            total,
            concurrency,
            timestamp: Utc::now(),
        });
    }

    fn failed(&self, outcome: &UpsertOutcome) {
        if let Some(reason) = outcome.failure_message() {
            self.event_bus.emit_lossy(LoaderEvent::RecordFailed {
                ordinal: outcome.ordinal,
                reason,
            });
        }
    }

    fn finished(&self, ledger: &Ledger) {
        self.event_bus.emit_lossy(LoaderEvent::RunCompleted {
            run_id: self.run_id,
            success_count: ledger.success_count,
            failure_count: ledger.failure_count,
            cancelled: ledger.cancelled,
            timestamp: Utc::now(),
        });
    }
}
