//! Outcome ledger
//!
//! [`OutcomeLedger`] is the run-scoped accumulator written by executor
//! completions while a batch is in flight. Every `record` call takes the lock
//! once, so counters and the failure list never go through a
//! read-modify-write race. When the orchestrator returns, the accumulator is
//! frozen into a [`Ledger`], which is the only thing reporting reads.

use super::resource::{OutcomeStatus, UpsertOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct LedgerState {
    success_count: usize,
    failure_count: usize,
    failure_messages: Vec<String>,
    outcomes: BTreeMap<usize, UpsertOutcome>,
}

/// Append-only accumulator shared by concurrent executor invocations
#[derive(Debug, Default)]
pub struct OutcomeLedger {
    state: Mutex<LedgerState>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one outcome
    ///
    /// Failure messages are kept in completion order.
    pub fn record(&self, outcome: UpsertOutcome) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match &outcome.status {
            OutcomeStatus::Success(_) => state.success_count += 1,
            OutcomeStatus::Failure { .. } => {
                state.failure_count += 1;
                if let Some(message) = outcome.failure_message() {
                    state.failure_messages.push(message);
                }
            }
        }

        if let Some(previous) = state.outcomes.insert(outcome.ordinal, outcome) {
            tracing::warn!(
                ordinal = previous.ordinal,
                "Outcome recorded twice for the same ordinal"
            );
        }
    }

    /// Outcomes recorded so far
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.success_count + state.failure_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze into the read-only run summary
    pub fn finish(self, next_index: usize, cancelled: bool) -> Ledger {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        Ledger {
            success_count: state.success_count,
            failure_count: state.failure_count,
            failure_messages: state.failure_messages,
            outcomes: state.outcomes.into_values().collect(),
            next_index,
            cancelled,
        }
    }
}

/// Final state of a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ledger {
    pub success_count: usize,
    pub failure_count: usize,
    /// Failure lines in completion order
    pub failure_messages: Vec<String>,
    /// Every outcome, sorted by source ordinal
    pub outcomes: Vec<UpsertOutcome>,
    /// Index of the first resource not dispatched; pass as `resume_from`
    /// to continue an interrupted run
    pub next_index: usize,
    /// Run stopped at a chunk barrier before every chunk was dispatched
    pub cancelled: bool,
}

impl Ledger {
    /// Ledger of a run that applied nothing
    pub fn empty(next_index: usize) -> Self {
        OutcomeLedger::new().finish(next_index, false)
    }

    /// Resources with a determined outcome
    pub fn processed(&self) -> usize {
        self.success_count + self.failure_count
    }

    /// Outcome for a source ordinal
    pub fn outcome(&self, ordinal: usize) -> Option<&UpsertOutcome> {
        self.outcomes
            .binary_search_by_key(&ordinal, |o| o.ordinal)
            .ok()
            .map(|i| &self.outcomes[i])
    }

    /// Failed outcomes in ordinal order
    pub fn failures(&self) -> impl Iterator<Item = &UpsertOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}
