//! CSV input adapter
//!
//! Turns a CSV file into [`Record`]s. Header names are normalized (byte order
//! marks and surrounding whitespace removed); when two headers normalize to
//! the same name the first column wins and the later one is dropped.
//! Rows shorter than the header are padded with empty values.

use crate::error::LoaderResult;
use crate::models::Record;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Column kept from the header row
#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    index: usize,
    name: String,
}

/// Read all records from a CSV file
pub fn read_records(path: &Path) -> LoaderResult<Vec<Record>> {
    let file = std::fs::File::open(path)?;
    let records = read_records_from(file)?;
    info!(path = %path.display(), rows = records.len(), "CSV input loaded");
    Ok(records)
}

/// Read all records from any reader
pub fn read_records_from<R: Read>(reader: R) -> LoaderResult<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let columns = dedupe_headers(&headers);

    let mut records = Vec::new();
    for (ordinal, row) in reader.records().enumerate() {
        let row = row?;

        if row.len() > headers.len() {
            debug!(ordinal, cells = row.len(), "Ignoring cells beyond the header row");
        }

        let fields: BTreeMap<String, String> = columns
            .iter()
            .map(|column| {
                let value = row.get(column.index).unwrap_or_default();
                (column.name.clone(), value.to_string())
            })
            .collect();

        records.push(Record::new(ordinal, fields));
    }

    Ok(records)
}

/// Strip BOMs and whitespace from header names, keeping the first duplicate
fn dedupe_headers(headers: &csv::StringRecord) -> Vec<Column> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(headers.len());

    for (index, raw) in headers.iter().enumerate() {
        let name = normalize_header(raw);

        if seen.insert(name.clone()) {
            columns.push(Column { index, name });
        } else {
            warn!(
                header = %name,
                column = index,
                "Duplicate CSV header, keeping the first column"
            );
        }
    }

    columns
}

fn normalize_header(raw: &str) -> String {
    raw.trim_matches(|c: char| c == '\u{feff}' || c.is_whitespace())
        .to_string()
}
