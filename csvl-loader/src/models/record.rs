//! Source rows
//!
//! A [`Record`] is one tokenized CSV row. Its ordinal is the 0-based data row
//! index (header excluded) and follows the record through mapping and upsert
//! so every outcome can be traced back to the row it came from.

use crate::services::schema_check::Violation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One flat source row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 0-based data row index
    pub ordinal: usize,
    /// Header name → cell value
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(ordinal: usize, fields: BTreeMap<String, String>) -> Self {
        Self { ordinal, fields }
    }

    /// Build a record from `(header, value)` pairs
    pub fn from_pairs<K, V>(ordinal: usize, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            ordinal,
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// JSON object view used for schema validation
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

/// A row that failed input validation
///
/// Keeps the raw row so it can be corrected and reloaded by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRow {
    pub ordinal: usize,
    pub row: BTreeMap<String, String>,
    pub violations: Vec<Violation>,
}

impl InvalidRow {
    /// One-line description: `Record 4: /date: "2308" is shorter than 6 characters`
    pub fn summary(&self) -> String {
        let details: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        format!("Record {}: {}", self.ordinal, details.join("; "))
    }
}
