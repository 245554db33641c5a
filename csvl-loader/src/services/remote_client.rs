//! Remote resource store interface
//!
//! Everything the pipeline needs from the remote service, expressed as a
//! trait so the executor and orchestrator can run against the HTTP client in
//! production and an in-memory double in tests.

use crate::utils::RetryDecision;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Remote call errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection refused, reset, DNS failure
    #[error("Network error: {0}")]
    Network(String),

    /// Request did not complete within the client timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-success HTTP status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    /// Network trouble, timeouts, 408, 429 and 5xx are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => true,
            RemoteError::Api { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            RemoteError::Parse(_) => false,
        }
    }

    /// Classifier for [`crate::utils::retry_with`]
    pub fn retry_decision(&self) -> RetryDecision {
        if self.is_transient() {
            RetryDecision::Retry
        } else {
            RetryDecision::Abort
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Remote resource types the loader can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Product,
    Thng,
    Collection,
}

impl ResourceKind {
    /// Collection segment of the REST path
    pub fn collection_path(&self) -> &'static str {
        match self {
            ResourceKind::Product => "products",
            ResourceKind::Thng => "thngs",
            ResourceKind::Collection => "collections",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Product => "product",
            ResourceKind::Thng => "thng",
            ResourceKind::Collection => "collection",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" => Ok(ResourceKind::Product),
            "thng" => Ok(ResourceKind::Thng),
            "collection" => Ok(ResourceKind::Collection),
            other => Err(format!(
                "Unsupported resource type '{}' (expected product, thng or collection)",
                other
            )),
        }
    }
}

/// How an existing resource is found for update
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    /// Match on `name`
    Name(String),
    /// Match on `identifiers.<key>`
    Identifier { key: String, value: String },
}

impl MatchKey {
    /// Filter expression understood by the remote API
    ///
    /// Keys and values are escaped so they always form a single equality term.
    pub fn filter(&self) -> String {
        match self {
            MatchKey::Name(name) => format!("name={}", escape_filter_term(name)),
            MatchKey::Identifier { key, value } => format!(
                "identifiers.{}={}",
                escape_filter_term(key),
                escape_filter_term(value)
            ),
        }
    }
}

/// Characters with a meaning in filter expressions
const FILTER_RESERVED: &[char] = &['\\', '&', '|', '!', '=', '<', '>', '~', '(', ')', ','];

/// Backslash-escape filter operators inside a key or value
pub fn escape_filter_term(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if FILTER_RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Logical container resources are scoped to (a project)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Resource as returned by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Linked short-URL resource (redirector)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecondaryResource {
    #[serde(rename = "shortId", default)]
    pub short_id: Option<String>,
    #[serde(rename = "shortDomain", default)]
    pub short_domain: Option<String>,
}

/// Remote resource store
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Find or create the container named `name`
    async fn ensure_container(&self, name: &str) -> Result<ContainerRef, RemoteError>;

    /// Create `document` if nothing matches `key`, else update the match
    async fn upsert(
        &self,
        kind: ResourceKind,
        document: &Value,
        key: &MatchKey,
    ) -> Result<RemoteResource, RemoteError>;

    /// Attach resource `id` to `container`
    async fn update_scope(
        &self,
        kind: ResourceKind,
        id: &str,
        container: &ContainerRef,
    ) -> Result<(), RemoteError>;

    /// Update the secondary resource of `id`, creating it if absent
    async fn upsert_secondary(
        &self,
        kind: ResourceKind,
        id: &str,
        payload: &Value,
    ) -> Result<SecondaryResource, RemoteError>;

    /// Plain GET of an artifact
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}
