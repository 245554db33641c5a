//! Schema validation capability
//!
//! The pipeline only needs "does this value satisfy that schema, and if not,
//! why". [`SchemaCheck`] is that seam; [`JsonSchemaCheck`] backs it with the
//! `jsonschema` crate for user-supplied schema files, and any
//! `Fn(&Value) -> Vec<Violation>` closure can stand in for it.

use crate::error::{LoaderError, LoaderResult};
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON pointer of the offending value (empty for the root)
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Structural validation of a JSON value
///
/// An empty result means the value is valid. A non-empty result is not an
/// error by itself; the caller decides whether it is terminal.
pub trait SchemaCheck: Send + Sync {
    fn check(&self, instance: &Value) -> Vec<Violation>;
}

impl<F> SchemaCheck for F
where
    F: Fn(&Value) -> Vec<Violation> + Send + Sync,
{
    fn check(&self, instance: &Value) -> Vec<Violation> {
        self(instance)
    }
}

/// Accepts every value (used by `--dry-run` tooling and tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SchemaCheck for AcceptAll {
    fn check(&self, _instance: &Value) -> Vec<Violation> {
        Vec::new()
    }
}

/// Compiled JSON Schema
pub struct JsonSchemaCheck {
    name: String,
    compiled: JSONSchema,
}

impl JsonSchemaCheck {
    /// Compile a schema document
    ///
    /// `name` identifies the schema in error messages (usually its file path).
    pub fn compile(name: impl Into<String>, schema: &Value) -> LoaderResult<Self> {
        let name = name.into();
        let compiled = JSONSchema::compile(schema).map_err(|e| LoaderError::Schema {
            name: name.clone(),
            message: e.to_string(),
        })?;

        Ok(Self { name, compiled })
    }

    /// Read and compile a schema file
    pub fn load(path: &Path) -> LoaderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::Schema {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        let schema: Value = serde_json::from_str(&content).map_err(|e| LoaderError::Schema {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;

        Self::compile(path.display().to_string(), &schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for JsonSchemaCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaCheck")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SchemaCheck for JsonSchemaCheck {
    fn check(&self, instance: &Value) -> Vec<Violation> {
        match self.compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| Violation::new(e.instance_path.to_string(), e.to_string()))
                .collect(),
        }
    }
}

/// Multi-line summary in the loader's report format
///
/// ```text
/// Schema validation failed: Blue Mug
/// - /tags/0: "" is shorter than 1 character
/// ```
pub fn summarize(subject: &str, violations: &[Violation]) -> String {
    let mut summary = format!("Schema validation failed: {}", subject);
    for violation in violations {
        summary.push_str("\n- ");
        summary.push_str(&violation.to_string());
    }
    summary
}
