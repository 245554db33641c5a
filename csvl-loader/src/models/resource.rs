//! Mapped resource documents and their upsert outcomes

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Document field carrying a per-record redirect URL
///
/// It drives redirector provisioning and is stripped from the upsert payload.
pub const REDIRECT_URL_FIELD: &str = "redirectUrl";

/// Nested resource description produced by the field mapper
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDocument {
    /// Ordinal of the source row
    pub ordinal: usize,
    /// Document body sent to the remote store
    pub body: Map<String, Value>,
    /// Value found at the mapping's identity path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl ResourceDocument {
    pub fn new(ordinal: usize, body: Map<String, Value>) -> Self {
        Self {
            ordinal,
            body,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Top-level string field, if present
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// Identity value, falling back to `name`, for messages and file names
    pub fn display_name(&self) -> &str {
        self.identity
            .as_deref()
            .or_else(|| self.str_field("name"))
            .unwrap_or("<unnamed>")
    }

    /// Per-record redirect URL, if the mapping produced one
    pub fn redirect_url(&self) -> Option<&str> {
        self.str_field(REDIRECT_URL_FIELD)
            .filter(|url| !url.trim().is_empty())
    }

    /// Body as sent to the remote store (without loader-only fields)
    pub fn payload(&self) -> Value {
        let mut body = self.body.clone();
        body.remove(REDIRECT_URL_FIELD);
        Value::Object(body)
    }

    /// Full body including loader-only fields
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

/// Details of a successfully applied resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedResource {
    /// Remote id of the upserted resource
    pub remote_id: String,
    /// Attempts the upsert call needed (1 = no retry)
    pub upsert_attempts: u32,
    /// Short id of the provisioned redirector
    pub short_id: Option<String>,
    /// Where the QR image was written
    pub artifact: Option<PathBuf>,
}

/// Result of applying one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success(AppliedResource),
    Failure { reason: String },
}

/// Per-resource outcome, keyed by source ordinal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub ordinal: usize,
    /// Name of the resource (for messages)
    pub identity: String,
    pub status: OutcomeStatus,
}

impl UpsertOutcome {
    pub fn success(ordinal: usize, identity: impl Into<String>, applied: AppliedResource) -> Self {
        Self {
            ordinal,
            identity: identity.into(),
            status: OutcomeStatus::Success(applied),
        }
    }

    pub fn failure(ordinal: usize, identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ordinal,
            identity: identity.into(),
            status: OutcomeStatus::Failure {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success(_))
    }

    pub fn remote_id(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Success(applied) => Some(applied.remote_id.as_str()),
            OutcomeStatus::Failure { .. } => None,
        }
    }

    /// Ledger line for failed outcomes
    pub fn failure_message(&self) -> Option<String> {
        match &self.status {
            OutcomeStatus::Failure { reason } => Some(format!(
                "Record {} ({}): {}",
                self.ordinal, self.identity, reason
            )),
            OutcomeStatus::Success(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ResourceDocument {
        match value {
            Value::Object(body) => ResourceDocument::new(0, body),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_payload_strips_redirect_url() {
        let d = doc(json!({"name": "foo", "redirectUrl": "https://example.com"}));

        assert_eq!(d.redirect_url(), Some("https://example.com"));
        assert_eq!(d.payload(), json!({"name": "foo"}));
        assert!(d.to_value().get("redirectUrl").is_some());
    }

    #[test]
    fn test_blank_redirect_url_ignored() {
        let d = doc(json!({"name": "foo", "redirectUrl": "  "}));
        assert_eq!(d.redirect_url(), None);
    }

    #[test]
    fn test_display_name_prefers_identity() {
        let document = doc(json!({ "name": "Mug", "identifiers": { "sku": "M-1" } }));
        assert_eq!(document.display_name(), "Mug");
        assert_eq!(document.clone().with_identity("M-1").display_name(), "M-1");
        assert_eq!(doc(json!({ "tags": ["x"] })).display_name(), "<unnamed>");
    }

    #[test]
    fn test_failure_message_names_record() {
        let outcome = UpsertOutcome::failure(12, "Blue Mug", "API error 400: Bad request!");
        assert_eq!(
            outcome.failure_message().as_deref(),
            Some("Record 12 (Blue Mug): API error 400: Bad request!")
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.remote_id(), None);
    }
}
