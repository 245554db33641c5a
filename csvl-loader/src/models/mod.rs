//! Data models for csvl-loader

pub mod ledger;
pub mod record;
pub mod resource;

pub use ledger::{Ledger, OutcomeLedger};
pub use record::{InvalidRow, Record};
pub use resource::{AppliedResource, OutcomeStatus, ResourceDocument, UpsertOutcome};
