//! Field mapper
//!
//! Turns a flat [`Record`] into a nested [`ResourceDocument`] using a mapping
//! table of `source header → target path`. Target paths come in three shapes:
//!
//! | Expression              | Variant                         |
//! |-------------------------|---------------------------------|
//! | `name`                  | `Bare("name")`                  |
//! | `customFields.colour`   | `Nested("customFields", "colour")` |
//! | `tags[0]`               | `Indexed("tags", 0)`            |
//!
//! Nesting stops at two levels. Expressions are parsed once when the table is
//! loaded; mapping a record is a pure walk over the parsed variants.

use crate::models::{Record, ResourceDocument};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Mapping failures
///
/// All of these are configuration defects: a malformed mapping table makes
/// every record suspect, so the run stops before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// A record column has no entry in the mapping table
    #[error("No mapping specified for {field} (record {ordinal})")]
    UnmappedField { field: String, ordinal: usize },

    /// A target path expression cannot be parsed
    #[error("Invalid key mapping result from {path} (for {source_field}): {reason}")]
    InvalidPath {
        source_field: String,
        path: String,
        reason: String,
    },

    /// Two target paths need incompatible shapes at the same key
    #[error("Conflicting target paths at '{key}': used as {first} and {second}")]
    PathConflict {
        key: String,
        first: &'static str,
        second: &'static str,
    },

    /// Indexed targets leave a hole in the array
    #[error("Array '{field}' has no value at index {missing_index} (record {ordinal})")]
    SparseArray {
        field: String,
        missing_index: usize,
        ordinal: usize,
    },

    /// Mapped document has no usable identity value
    #[error("Resource mapped from record {ordinal} must have a '{field}'")]
    MissingIdentityField { field: String, ordinal: usize },
}

/// Parsed target path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetPath {
    /// `key`
    Bare(String),
    /// `object.field`
    Nested { object: String, field: String },
    /// `field[index]`
    Indexed { field: String, index: usize },
}

impl TargetPath {
    /// Parse an expression
    ///
    /// `source_field` only feeds error messages.
    pub fn parse(source_field: &str, expr: &str) -> Result<Self, MapError> {
        let invalid = |reason: &str| MapError::InvalidPath {
            source_field: source_field.to_string(),
            path: expr.to_string(),
            reason: reason.to_string(),
        };

        let expr_trimmed = expr.trim();
        if expr_trimmed.is_empty() {
            return Err(invalid("empty target path"));
        }
        if expr_trimmed != expr {
            return Err(invalid("surrounding whitespace"));
        }

        if let Some(open) = expr.find('[') {
            let field = &expr[..open];
            let rest = &expr[open + 1..];
            let index_str = rest
                .strip_suffix(']')
                .ok_or_else(|| invalid("indexed path must end with ']'"))?;

            if field.is_empty() {
                return Err(invalid("indexed path has no field name"));
            }
            if field.contains('.') || field.contains(']') {
                return Err(invalid("indexed path must target a top-level field"));
            }
            if index_str.is_empty() || !index_str.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("array index must be a non-negative integer"));
            }
            let index = index_str
                .parse::<usize>()
                .map_err(|_| invalid("array index out of range"))?;

            return Ok(TargetPath::Indexed {
                field: field.to_string(),
                index,
            });
        }

        if expr.contains(']') {
            return Err(invalid("unmatched ']'"));
        }

        if expr.contains('.') {
            let segments: Vec<&str> = expr.split('.').collect();
            if segments.len() != 2 {
                return Err(invalid("at most two levels of nesting are supported"));
            }
            if segments.iter().any(|s| s.is_empty()) {
                return Err(invalid("empty path segment"));
            }
            return Ok(TargetPath::Nested {
                object: segments[0].to_string(),
                field: segments[1].to_string(),
            });
        }

        Ok(TargetPath::Bare(expr.to_string()))
    }

    /// Top-level document key this path writes under
    pub fn root_key(&self) -> &str {
        match self {
            TargetPath::Bare(key) => key,
            TargetPath::Nested { object, .. } => object,
            TargetPath::Indexed { field, .. } => field,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            TargetPath::Bare(_) => "a value",
            TargetPath::Nested { .. } => "an object",
            TargetPath::Indexed { .. } => "an array",
        }
    }

    /// Read the string stored at this path
    pub fn extract<'a>(&self, document: &'a Map<String, Value>) -> Option<&'a str> {
        match self {
            TargetPath::Bare(key) => document.get(key).and_then(Value::as_str),
            TargetPath::Nested { object, field } => document
                .get(object)
                .and_then(|o| o.get(field))
                .and_then(Value::as_str),
            TargetPath::Indexed { field, index } => document
                .get(field)
                .and_then(|a| a.get(*index))
                .and_then(Value::as_str),
        }
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPath::Bare(key) => write!(f, "{}", key),
            TargetPath::Nested { object, field } => write!(f, "{}.{}", object, field),
            TargetPath::Indexed { field, index } => write!(f, "{}[{}]", field, index),
        }
    }
}

/// Parsed, immutable mapping table
#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: BTreeMap<String, TargetPath>,
    identity: TargetPath,
}

impl MappingTable {
    /// Parse raw `header → expression` entries
    ///
    /// `identity_field` is the path every mapped document must carry a
    /// non-empty value at (usually `name`).
    pub fn parse<I, K, V>(raw: I, identity_field: &str) -> Result<Self, MapError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut entries = BTreeMap::new();
        let mut shapes: HashMap<String, &'static str> = HashMap::new();

        for (source, expr) in raw {
            let source = source.into();
            let path = TargetPath::parse(&source, expr.as_ref())?;

            let shape = path.shape();
            match shapes.get(path.root_key()) {
                Some(existing) if *existing != shape => {
                    return Err(MapError::PathConflict {
                        key: path.root_key().to_string(),
                        first: existing,
                        second: shape,
                    });
                }
                Some(_) => {}
                None => {
                    shapes.insert(path.root_key().to_string(), shape);
                }
            }

            entries.insert(source, path);
        }

        let identity = TargetPath::parse("<identity>", identity_field)?;

        Ok(Self { entries, identity })
    }

    /// Build from a JSON object whose values are path expressions
    pub fn from_json(value: &Value, identity_field: &str) -> Result<Self, MapError> {
        let object = value.as_object().ok_or_else(|| MapError::InvalidPath {
            source_field: "<mapping>".to_string(),
            path: value.to_string(),
            reason: "mapping must be a JSON object".to_string(),
        })?;

        let mut raw = Vec::with_capacity(object.len());
        for (source, expr) in object {
            let expr = expr.as_str().ok_or_else(|| MapError::InvalidPath {
                source_field: source.clone(),
                path: expr.to_string(),
                reason: "target path must be a string".to_string(),
            })?;
            raw.push((source.clone(), expr.to_string()));
        }

        Self::parse(raw, identity_field)
    }

    /// Load a mapping file
    pub fn load(path: &Path, identity_field: &str) -> crate::LoaderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        Ok(Self::from_json(&value, identity_field)?)
    }

    pub fn target(&self, source_field: &str) -> Option<&TargetPath> {
        self.entries.get(source_field)
    }

    pub fn identity(&self) -> &TargetPath {
        &self.identity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map one record
    pub fn map(&self, record: &Record) -> Result<ResourceDocument, MapError> {
        let mut body = Map::new();
        let mut arrays: BTreeMap<&str, BTreeMap<usize, &str>> = BTreeMap::new();

        for (key, value) in &record.fields {
            let path = self.entries.get(key).ok_or_else(|| MapError::UnmappedField {
                field: key.clone(),
                ordinal: record.ordinal,
            })?;

            match path {
                TargetPath::Bare(target) => {
                    body.insert(target.clone(), Value::String(value.clone()));
                }
                TargetPath::Nested { object, field } => {
                    let nested = body
                        .entry(object.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    match nested {
                        Value::Object(map) => {
                            map.insert(field.clone(), Value::String(value.clone()));
                        }
                        _ => {
                            return Err(MapError::PathConflict {
                                key: object.clone(),
                                first: "a value",
                                second: "an object",
                            })
                        }
                    }
                }
                TargetPath::Indexed { field, index } => {
                    // Last write wins for duplicate indices
                    arrays
                        .entry(field.as_str())
                        .or_default()
                        .insert(*index, value.as_str());
                }
            }
        }

        for (field, slots) in arrays {
            let mut items = Vec::with_capacity(slots.len());
            for (expected, (index, value)) in slots.into_iter().enumerate() {
                if index != expected {
                    return Err(MapError::SparseArray {
                        field: field.to_string(),
                        missing_index: expected,
                        ordinal: record.ordinal,
                    });
                }
                items.push(Value::String(value.to_string()));
            }
            body.insert(field.to_string(), Value::Array(items));
        }

        let identity = match self.identity.extract(&body) {
            Some(value) if !value.trim().is_empty() => value.to_string(),
            _ => {
                return Err(MapError::MissingIdentityField {
                    field: self.identity.to_string(),
                    ordinal: record.ordinal,
                })
            }
        };

        Ok(ResourceDocument::new(record.ordinal, body).with_identity(identity))
    }

    /// Map every record, stopping at the first defect
    pub fn map_all(&self, records: &[Record]) -> Result<Vec<ResourceDocument>, MapError> {
        records.iter().map(|r| self.map(r)).collect()
    }
}
