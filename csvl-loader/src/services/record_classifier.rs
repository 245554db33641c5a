//! Record classifier
//!
//! Splits rows into those that satisfy the input schema and those that do
//! not. Partial success is the normal case: every row is checked, an invalid
//! row never stops the rest, and invalid rows keep their ordinal and raw
//! content for later reconciliation.

use crate::models::{InvalidRow, Record};
use crate::services::schema_check::SchemaCheck;
use tracing::{debug, info, warn};

/// Rows partitioned by input validity
#[derive(Debug, Default)]
pub struct ClassifiedRows {
    /// Rows that passed, in source order
    pub valid: Vec<Record>,
    /// Rows that failed, in source order
    pub invalid: Vec<InvalidRow>,
}

impl ClassifiedRows {
    pub fn total(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }
}

/// Validate every row against the input schema
pub fn classify(rows: Vec<Record>, input_schema: &dyn SchemaCheck) -> ClassifiedRows {
    let mut classified = ClassifiedRows::default();

    for record in rows {
        let violations = input_schema.check(&record.to_json());

        if violations.is_empty() {
            classified.valid.push(record);
        } else {
            debug!(
                ordinal = record.ordinal,
                violations = violations.len(),
                "Row failed input validation"
            );
            classified.invalid.push(InvalidRow {
                ordinal: record.ordinal,
                row: record.fields,
                violations,
            });
        }
    }

    if classified.invalid.is_empty() {
        info!(rows = classified.total(), "All rows passed input validation");
    } else {
        warn!(
            valid = classified.valid.len(),
            invalid = classified.invalid.len(),
            "Some rows failed input validation and will be skipped"
        );
    }

    classified
}
